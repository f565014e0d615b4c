use serde_json::{json, Value};
use thiserror::Error;

/// The closed set of failures an inference run surfaces to callers.
///
/// Every variant serializes to a JSON document with stable `name`,
/// `message`, and `stack` fields plus kind-specific detail, so the
/// CLI can emit it on the diagnostic channel unchanged.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Inference terminated by signal {signal}")]
    InferenceTerminated { signal: i32, code: i32 },

    #[error("Parsing produced no base environments")]
    NoBaseEnvironments,

    #[error("Inference exceeded its time budget after {elapsed_secs}s and {num_validations} validations")]
    InferenceTimeout {
        elapsed_secs: u64,
        num_validations: usize,
    },

    #[error("Search exhausted after {elapsed_secs}s and {num_validations} validations without a working environment")]
    NoWorkingEnvironment {
        elapsed_secs: u64,
        num_validations: usize,
        terminal_metadata: Vec<Value>,
    },

    #[error("Validation sandbox protocol violated: {message}")]
    ValidationError { message: String },

    #[error("Unexpected inference failure: {cause}")]
    UnexpectedInference { cause: String },
}

impl InferenceError {
    pub fn name(&self) -> &'static str {
        match self {
            InferenceError::InferenceTerminated { .. } => "InferenceTerminated",
            InferenceError::NoBaseEnvironments => "NoBaseEnvironments",
            InferenceError::InferenceTimeout { .. } => "InferenceTimeout",
            InferenceError::NoWorkingEnvironment { .. } => "NoWorkingEnvironment",
            InferenceError::ValidationError { .. } => "ValidationError",
            InferenceError::UnexpectedInference { .. } => "UnexpectedInference",
        }
    }

    /// Process exit code for the CLI: POSIX-style `128 + signo` for
    /// termination, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            InferenceError::InferenceTerminated { code, .. } => *code,
            _ => 1,
        }
    }

    /// Wrap an arbitrary failure, preserving a structured variant if
    /// one is already in the chain.
    pub fn from_unexpected(err: anyhow::Error) -> Self {
        match err.downcast::<InferenceError>() {
            Ok(structured) => structured,
            Err(other) => InferenceError::UnexpectedInference {
                cause: format!("{:#}", other),
            },
        }
    }

    pub fn to_json(&self) -> Value {
        let mut doc = json!({
            "name": self.name(),
            "message": self.to_string(),
            "stack": format!("{}: {}", self.name(), self),
        });
        let extra = match self {
            InferenceError::InferenceTerminated { signal, code } => json!({
                "signal": signal,
                "code": code,
            }),
            InferenceError::NoBaseEnvironments => json!({}),
            InferenceError::InferenceTimeout {
                elapsed_secs,
                num_validations,
            } => json!({
                "elapsedSecs": elapsed_secs,
                "numValidations": num_validations,
            }),
            InferenceError::NoWorkingEnvironment {
                elapsed_secs,
                num_validations,
                terminal_metadata,
            } => json!({
                "elapsedSecs": elapsed_secs,
                "numValidations": num_validations,
                "terminalMetadata": terminal_metadata,
            }),
            InferenceError::ValidationError { message } => json!({
                "detail": message,
            }),
            InferenceError::UnexpectedInference { cause } => json!({
                "cause": cause,
            }),
        };
        if let (Some(doc), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                doc.insert(key.clone(), value.clone());
            }
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_carries_stable_names() {
        let err = InferenceError::InferenceTimeout {
            elapsed_secs: 3600,
            num_validations: 12,
        };
        let doc = err.to_json();
        assert_eq!(doc["name"], "InferenceTimeout");
        assert_eq!(doc["numValidations"], 12);
        assert!(doc["message"].as_str().unwrap().contains("3600"));
    }

    #[test]
    fn terminated_exit_code_is_posix_style() {
        let err = InferenceError::InferenceTerminated {
            signal: 15,
            code: 143,
        };
        assert_eq!(err.exit_code(), 143);
        assert_eq!(err.to_json()["signal"], 15);
    }

    #[test]
    fn from_unexpected_preserves_structured_variants() {
        let inner = anyhow::Error::new(InferenceError::NoBaseEnvironments);
        let err = InferenceError::from_unexpected(inner);
        assert_eq!(err.name(), "NoBaseEnvironments");

        let wrapped = InferenceError::from_unexpected(anyhow::anyhow!("graph query failed"));
        assert_eq!(wrapped.name(), "UnexpectedInference");
        assert!(wrapped.to_json()["cause"]
            .as_str()
            .unwrap()
            .contains("graph query failed"));
    }
}
