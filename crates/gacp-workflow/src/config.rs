//! # Workflow Configuration
//!
//! Every tunable threshold in one serde value. Loaded from YAML, validated
//! once, then shared read-only by the engine.
//!
//! ```yaml
//! fees:
//!   document_review: 5000
//!   audit: 25000
//! review_pass_score: 70
//! audit:
//!   pass_score: 80
//!   fail_below: 60
//! rejections:
//!   free_resubmissions: 2
//!   max_rejections: 3
//! payment_expiry_days: 7
//! max_audit_rounds: ~
//! side_effects: background
//! ```
//!
//! Missing keys take their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::AuditEscalationPolicy;
use crate::payment::{FeeSchedule, PaymentReason};
use crate::rejection::RejectionPolicy;

/// Environment variable naming a YAML configuration file.
pub const CONFIG_ENV_VAR: &str = "GACP_WORKFLOW_CONFIG";

/// Where post-commit side effects run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// On the calling thread, after the commit.
    Inline,
    /// On the tokio blocking pool when a runtime is present, inline otherwise.
    #[default]
    Background,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for the certification workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub fees: FeeSchedule,
    /// Minimum mean checklist score for an approving review.
    pub review_pass_score: u8,
    pub audit: AuditEscalationPolicy,
    pub rejections: RejectionPolicy,
    /// Days after which an unpaid milestone counts as expired.
    pub payment_expiry_days: u32,
    /// Document types that must be uploaded and active before submission.
    pub required_documents: Vec<String>,
    /// Cap on audit rounds before an administrator may close the
    /// application. `None` leaves re-audits unbounded.
    pub max_audit_rounds: Option<u32>,
    pub side_effects: DispatchMode,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            fees: FeeSchedule::default(),
            review_pass_score: 70,
            audit: AuditEscalationPolicy::default(),
            rejections: RejectionPolicy::default(),
            payment_expiry_days: 7,
            required_documents: ["id_card", "land_title", "farm_map", "cultivation_plan"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_audit_rounds: None,
            side_effects: DispatchMode::default(),
        }
    }
}

impl WorkflowConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Load the file named by `GACP_WORKFLOW_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::load(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        for reason in PaymentReason::ALL {
            if self.fees.base_fee(reason).units() == 0 {
                return invalid(format!("fee for {reason} must be positive"));
            }
        }
        if self.review_pass_score > 100 {
            return invalid(format!(
                "review_pass_score {} exceeds 100",
                self.review_pass_score
            ));
        }
        if self.audit.pass_score > 100 {
            return invalid(format!("audit.pass_score {} exceeds 100", self.audit.pass_score));
        }
        if self.audit.fail_below > self.audit.pass_score {
            return invalid(format!(
                "audit.fail_below {} is above audit.pass_score {}",
                self.audit.fail_below, self.audit.pass_score
            ));
        }
        if self.rejections.free_resubmissions > self.rejections.max_rejections {
            return invalid(format!(
                "rejections.free_resubmissions {} exceeds max_rejections {}",
                self.rejections.free_resubmissions, self.rejections.max_rejections
            ));
        }
        if self.payment_expiry_days == 0 {
            return invalid("payment_expiry_days must be at least 1".to_string());
        }
        if self.max_audit_rounds == Some(0) {
            return invalid("max_audit_rounds must be at least 1 when set".to_string());
        }
        if let Some(blank) = self.required_documents.iter().find(|d| d.trim().is_empty()) {
            return invalid(format!("blank required document type {blank:?}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = WorkflowConfig::default();
        config.validate().unwrap();
        assert_eq!(config.review_pass_score, 70);
        assert_eq!(config.rejections.max_rejections, 3);
        assert_eq!(config.max_audit_rounds, None);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config = WorkflowConfig::from_yaml_str(
            "review_pass_score: 75\nmax_audit_rounds: 4\nside_effects: inline\naudit:\n  pass_score: 85\n",
        )
        .unwrap();
        assert_eq!(config.review_pass_score, 75);
        assert_eq!(config.max_audit_rounds, Some(4));
        assert_eq!(config.side_effects, DispatchMode::Inline);
        assert_eq!(config.audit.pass_score, 85);
        assert_eq!(config.audit.fail_below, 60);
        assert_eq!(config.fees, FeeSchedule::default());
    }

    #[test]
    fn inconsistent_cutoffs_rejected() {
        let err = WorkflowConfig::from_yaml_str("audit:\n  pass_score: 50\n  fail_below: 60\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
        let err = WorkflowConfig::from_yaml_str("rejections:\n  free_resubmissions: 4\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
        let err = WorkflowConfig::from_yaml_str("fees:\n  audit: 0\n").unwrap_err();
        assert!(err.to_string().contains("audit"));
    }

    #[test]
    fn unknown_dispatch_mode_is_a_parse_error() {
        let err = WorkflowConfig::from_yaml_str("side_effects: carrier_pigeon\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "payment_expiry_days: 14").unwrap();
        writeln!(file, "required_documents: [id_card]").unwrap();
        let config = WorkflowConfig::load(file.path()).unwrap();
        assert_eq!(config.payment_expiry_days, 14);
        assert_eq!(config.required_documents, vec!["id_card".to_string()]);
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let err = WorkflowConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("absent.yaml"));
    }

    #[test]
    fn yaml_roundtrip() {
        let config = WorkflowConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert_eq!(WorkflowConfig::from_yaml_str(&yaml).unwrap(), config);
    }
}
