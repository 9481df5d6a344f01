//! Business Policy Module
//!
//! This module provides a typed read-only view over the versioned policy
//! document that governs which chains, tokens, and amounts a business
//! accepts. The document is YAML with a front-matter block carrying the
//! version and lifecycle status.
//!
//! ## Access discipline
//!
//! Every request path loads the document fresh from disk. Nothing in this
//! crate caches a parsed policy across a request boundary, which is what
//! makes policy edits take effect on the very next request without a
//! process restart.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors produced while loading or validating the policy document.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy document does not exist at the configured path
    #[error("Policy document not found")]
    NotFound,
    /// The document could not be parsed
    #[error("Policy document malformed: {0}")]
    Malformed(String),
    /// The document parsed but violates a structural invariant
    #[error("Policy invariant violated: {0}")]
    InvariantViolated(String),
}

// ============================================================================
// POLICY STRUCTURES
// ============================================================================

/// Lifecycle status of the policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    /// Business has not completed onboarding; no payments accepted
    PendingOnboarding,
    /// Business is live and the policy is enforceable
    Active,
}

/// Identity of the business the policy belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Business {
    /// Stable business identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// EVM settlement wallet address
    pub wallet: String,
    /// Whether onboarding (email + wallet) completed
    pub onboarded: bool,
    /// Chat channel id for confirmations (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

/// What the business accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    /// Settlement chains payments may land on
    pub allowed_chains: Vec<String>,
    /// Token symbols accepted for payment
    pub allowed_tokens: Vec<String>,
}

/// Amount limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restrictions {
    /// Largest single payment accepted; 0 means unlimited
    pub max_single_payment: f64,
}

/// Operational toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operational {
    /// Whether installment (EMI) payments are offered
    pub emi_enabled: bool,
    /// Premium applied to installment plans, percent
    #[serde(default)]
    pub emi_premium_percent: f64,
}

/// Cross-chain acceptance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossChain {
    /// Source chains users may pay from (bridged to the settlement chain)
    #[serde(default)]
    pub user_payable_chains: Vec<String>,
    /// Bridge routing parameters
    pub bridge: BridgeRouting,
}

/// Bridge routing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRouting {
    /// Whether bridged payments are accepted at all
    pub enabled: bool,
    /// Bridge provider tag (only `across` is recognized)
    #[serde(default)]
    pub provider: String,
    /// Chain bridged funds settle on; must be an allowed chain
    #[serde(default)]
    pub settlement_chain: String,
}

/// Front-matter block of the policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FrontMatter {
    version: u64,
    status: PolicyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

/// Body of the policy document (everything below the front-matter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PolicyBody {
    business: Business,
    specification: Specification,
    restrictions: Restrictions,
    operational: Operational,
    cross_chain: CrossChain,
}

/// The full, validated policy document.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// Monotonic document version
    pub version: u64,
    /// Lifecycle status
    pub status: PolicyStatus,
    /// Last-edit timestamp as written by the policy editor
    pub updated_at: Option<String>,
    /// Business identity
    pub business: Business,
    /// Accepted chains and tokens
    pub specification: Specification,
    /// Amount limits
    pub restrictions: Restrictions,
    /// Operational toggles
    pub operational: Operational,
    /// Cross-chain acceptance
    pub cross_chain: CrossChain,
}

impl Policy {
    /// Parses a policy document from its front-matter text form.
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        let (front, body) = split_front_matter(text)?;
        let front: FrontMatter = serde_yaml::from_str(front)
            .map_err(|e| PolicyError::Malformed(format!("front-matter: {}", e)))?;
        let body: PolicyBody =
            serde_yaml::from_str(body).map_err(|e| PolicyError::Malformed(e.to_string()))?;

        let policy = Policy {
            version: front.version,
            status: front.status,
            updated_at: front.updated_at,
            business: body.business,
            specification: body.specification,
            restrictions: body.restrictions,
            operational: body.operational,
            cross_chain: body.cross_chain,
        };
        policy.check_invariants()?;
        Ok(policy)
    }

    /// Renders the policy back to its front-matter text form.
    ///
    /// `parse(serialize(p))` reproduces `p`; the policy editor relies on
    /// this when rewriting the document.
    pub fn serialize(&self) -> Result<String, PolicyError> {
        let front = FrontMatter {
            version: self.version,
            status: self.status,
            updated_at: self.updated_at.clone(),
        };
        let body = PolicyBody {
            business: self.business.clone(),
            specification: self.specification.clone(),
            restrictions: self.restrictions.clone(),
            operational: self.operational.clone(),
            cross_chain: self.cross_chain.clone(),
        };
        let front_yaml =
            serde_yaml::to_string(&front).map_err(|e| PolicyError::Malformed(e.to_string()))?;
        let body_yaml =
            serde_yaml::to_string(&body).map_err(|e| PolicyError::Malformed(e.to_string()))?;
        Ok(format!("---\n{}---\n{}", front_yaml, body_yaml))
    }

    /// Validates the structural invariants of the document.
    fn check_invariants(&self) -> Result<(), PolicyError> {
        if self.cross_chain.bridge.enabled {
            let settlement = &self.cross_chain.bridge.settlement_chain;
            if !self.allows_chain(settlement) {
                return Err(PolicyError::InvariantViolated(format!(
                    "bridge settlement chain '{}' is not an allowed chain",
                    settlement
                )));
            }
        }
        if self.status == PolicyStatus::Active {
            if self.specification.allowed_chains.is_empty() {
                return Err(PolicyError::InvariantViolated(
                    "active policy has no allowed chains".to_string(),
                ));
            }
            if self.specification.allowed_tokens.is_empty() {
                return Err(PolicyError::InvariantViolated(
                    "active policy has no allowed tokens".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Whether the business is ready to accept payments.
    pub fn is_ready(&self) -> bool {
        self.status == PolicyStatus::Active && self.business.onboarded
    }

    /// Whether a chain tag is an accepted settlement chain.
    pub fn allows_chain(&self, chain: &str) -> bool {
        self.specification
            .allowed_chains
            .iter()
            .any(|c| c.eq_ignore_ascii_case(chain))
    }

    /// Whether a token symbol is accepted, case-insensitive.
    pub fn allows_token(&self, token: &str) -> bool {
        self.specification
            .allowed_tokens
            .iter()
            .any(|t| t.eq_ignore_ascii_case(token))
    }

    /// Whether users may pay from this source chain via the bridge.
    pub fn user_payable(&self, chain: &str) -> bool {
        self.cross_chain
            .user_payable_chains
            .iter()
            .any(|c| c.eq_ignore_ascii_case(chain))
    }
}

/// Splits a document into its front-matter and body sections.
///
/// The document must open with a `---` line; the next `---` line closes the
/// front-matter and everything after it is the body.
fn split_front_matter(text: &str) -> Result<(&str, &str), PolicyError> {
    let rest = text
        .strip_prefix("---")
        .ok_or_else(|| PolicyError::Malformed("missing front-matter delimiter".to_string()))?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest
        .find("\n---")
        .ok_or_else(|| PolicyError::Malformed("unterminated front-matter".to_string()))?;
    let front = &rest[..end + 1];
    let body = rest[end + 4..].strip_prefix('\n').unwrap_or(&rest[end + 4..]);
    Ok((front, body))
}

// ============================================================================
// POLICY STORE
// ============================================================================

/// Read-only accessor for the policy document on disk.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    path: PathBuf,
}

impl PolicyStore {
    /// Creates a store reading from the given document path.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Loads, parses, and validates the document.
    ///
    /// Reads the file fresh on every call; a concurrent edit by the policy
    /// editor is observed by the next caller.
    pub fn load(&self) -> Result<Policy, PolicyError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PolicyError::NotFound
            } else {
                PolicyError::Malformed(e.to_string())
            }
        })?;
        Policy::parse(&text)
    }
}
