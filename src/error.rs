//! Error types surfaced at load time.
//!
//! Nothing in here is ever produced on the audio thread: configuration and
//! resource problems are resolved when instruments are loaded or started, and a
//! voice that could not find what it needed simply plays silence.

use thiserror::Error;

/// Errors raised while restoring instruments or graphs from a [`crate::patch::Element`] tree.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The element handed to `load` has the wrong tag.
    #[error("expected element <{expected}>, found <{found}>")]
    UnexpectedElement {
        /// Tag the loader wanted.
        expected: String,
        /// Tag that was supplied.
        found: String,
    },

    /// A required attribute is absent.
    #[error("missing attribute '{attr}' on <{element}>")]
    MissingAttribute {
        /// Tag of the element being read.
        element: String,
        /// Name of the missing attribute.
        attr: String,
    },

    /// An attribute is present but cannot be parsed.
    #[error("invalid value '{value}' for attribute '{attr}' on <{element}>")]
    InvalidValue {
        /// Tag of the element being read.
        element: String,
        /// Attribute name.
        attr: String,
        /// Raw attribute text.
        value: String,
    },

    /// The instrument type named in the project is not registered.
    #[error("unknown instrument type: {0}")]
    UnknownInstrument(String),
}

impl LoadError {
    /// Create a missing attribute error.
    pub fn missing(element: impl Into<String>, attr: impl Into<String>) -> Self {
        LoadError::MissingAttribute {
            element: element.into(),
            attr: attr.into(),
        }
    }

    /// Create an unexpected element error.
    pub fn unexpected(expected: impl Into<String>, found: impl Into<String>) -> Self {
        LoadError::UnexpectedElement {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Errors raised by the soundbank registry.
#[derive(Debug, Error)]
pub enum BankError {
    /// No bank is registered under the requested name.
    #[error("soundbank not loaded: {0}")]
    NotLoaded(String),

    /// A bank with this name is already registered.
    #[error("soundbank already loaded: {0}")]
    AlreadyLoaded(String),

    /// The bank still has voices or templates holding it.
    #[error("soundbank '{name}' is locked by {locks} holder(s)")]
    Locked {
        /// Bank name.
        name: String,
        /// Outstanding lock count.
        locks: usize,
    },

    /// The external loader failed to produce the bank.
    #[error("failed to load soundbank '{name}': {reason}")]
    LoadFailed {
        /// Bank name.
        name: String,
        /// Loader supplied reason.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_attribute_display() {
        let err = LoadError::missing("env", "rate");
        assert_eq!(err.to_string(), "missing attribute 'rate' on <env>");
    }

    #[test]
    fn unexpected_element_display() {
        let err = LoadError::unexpected("instr", "lib");
        assert_eq!(err.to_string(), "expected element <instr>, found <lib>");
    }

    #[test]
    fn locked_bank_display() {
        let err = BankError::Locked {
            name: "gm.sf2".to_string(),
            locks: 2,
        };
        assert_eq!(err.to_string(), "soundbank 'gm.sf2' is locked by 2 holder(s)");
    }
}
