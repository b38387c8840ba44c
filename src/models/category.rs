//! Named input/output channels binding a record format and a serializer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SliceworksError};

/// Which side of a job a category feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "inputs"),
            Self::Output => write!(f, "outputs"),
        }
    }
}

/// Record layout of a category's data, consumed by external tabular
/// renderers. The engine treats records as opaque either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    #[default]
    None,
    Csv,
    Json,
    Array,
    Psv,
    Fixed,
    Auto,
}

/// Binary encoding applied to a slice's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Serializer {
    None,
    #[default]
    Compress,
    Encrypt,
    Bzip2,
    EncryptedBzip2,
}

impl Serializer {
    /// The bzip2-streamed variants produce opaque concatenatable streams and
    /// are only valid on output categories.
    pub fn is_streamed(&self) -> bool {
        matches!(self, Self::Bzip2 | Self::EncryptedBzip2)
    }
}

/// A named logical input or output channel with its own format/serializer.
///
/// Each category maps 1:1 to a slice collection identified by
/// `{direction}.{job_id}[.{category}]`; the default category is `main`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub direction: Direction,
    pub serializer: Serializer,
    pub format: RecordFormat,
    /// Optional column layout for tabular formats.
    pub columns: Option<Vec<String>>,
    /// Records per slice; falls back to the configured default when unset.
    pub slice_size: Option<usize>,
}

pub const MAIN_CATEGORY: &str = "main";

impl Category {
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
            serializer: Serializer::default(),
            format: RecordFormat::default(),
            columns: None,
            slice_size: None,
        }
    }

    /// The `main` input category every batch job has exactly one of.
    pub fn main_input() -> Self {
        Self::new(MAIN_CATEGORY, Direction::Input)
    }

    pub fn main_output() -> Self {
        Self::new(MAIN_CATEGORY, Direction::Output)
    }

    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_format(mut self, format: RecordFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_slice_size(mut self, slice_size: usize) -> Self {
        self.slice_size = Some(slice_size);
        self
    }

    pub fn is_main(&self) -> bool {
        self.name == MAIN_CATEGORY
    }

    /// Reject configurations the codecs cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SliceworksError::Validation(
                "category name must not be empty".into(),
            ));
        }
        if self.serializer.is_streamed() && self.direction == Direction::Input {
            return Err(SliceworksError::Validation(format!(
                "category '{}': serializer {:?} is output-only",
                self.name, self.serializer
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streamed_serializers_are_output_only() {
        let category = Category::main_input().with_serializer(Serializer::Bzip2);
        assert!(category.validate().is_err());

        let category = Category::main_output().with_serializer(Serializer::Bzip2);
        assert!(category.validate().is_ok());

        let category = Category::main_input().with_serializer(Serializer::EncryptedBzip2);
        assert!(category.validate().is_err());
    }

    #[test]
    fn direction_renders_collection_prefix() {
        assert_eq!(Direction::Input.to_string(), "inputs");
        assert_eq!(Direction::Output.to_string(), "outputs");
    }

    #[test]
    fn default_serializer_is_compress() {
        assert_eq!(Category::main_input().serializer, Serializer::Compress);
    }
}
