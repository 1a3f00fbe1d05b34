//! `.tytest` descriptor parsing
//!
//! A descriptor is a small XML document:
//!
//! ```xml
//! <tytest>
//!     <sample>x = 1;</sample>
//!     <expected>int x = 1;</expected>
//!     <checker>#include &lt;stdio.h&gt; ...</checker>
//! </tytest>
//! ```
//!
//! Parsing yields a [`Descriptor`] with all three fields present and non-empty, or a
//! [`DescriptorError`] saying why not. Whether an error is recoverable for a batch run is
//! decided by [`DescriptorError::is_structural`].

use std::fs;
use std::path::Path;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// File extension of test descriptors (without the dot).
pub const DESCRIPTOR_EXTENSION: &str = "tytest";

/// Required name of the document's root element.
pub const ROOT_ELEMENT: &str = "tytest";

/// Which of the three required descriptor fields an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Sample,
    Expected,
    Checker,
}

impl Field {
    pub const ALL: [Field; 3] = [Field::Sample, Field::Expected, Field::Checker];

    /// Element name of this field inside the descriptor.
    pub fn tag(self) -> &'static str {
        match self {
            Field::Sample => "sample",
            Field::Expected => "expected",
            Field::Checker => "checker",
        }
    }

    fn from_tag(tag: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.tag() == tag)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A validated test descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// Source code in the tested language (fed to `tyx`)
    pub sample: String,
    /// Reference C code producing the expected behavior
    pub expected: String,
    /// C driver linked against both `sample` and `expected`
    pub checker: String,
}

impl Descriptor {
    pub fn field(&self, field: Field) -> &str {
        match field {
            Field::Sample => &self.sample,
            Field::Expected => &self.expected,
            Field::Checker => &self.checker,
        }
    }
}

/// Why a descriptor could not be turned into a [`Descriptor`].
#[derive(Debug, Error, Diagnostic)]
pub enum DescriptorError {
    #[error("cannot read descriptor '{path}': {source}")]
    #[diagnostic(code(tytest::descriptor::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not a valid .tytest file: {message}")]
    #[diagnostic(code(tytest::descriptor::syntax))]
    Syntax {
        message: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("missing 'tytest' root element, root is '{found}'. Not a valid .tytest file")]
    #[diagnostic(
        code(tytest::descriptor::wrong_root),
        help("wrap the sample, expected and checker elements in <tytest>...</tytest>")
    )]
    WrongRoot { found: String },

    #[error("descriptor has no <{0}> element")]
    #[diagnostic(code(tytest::descriptor::missing_field))]
    MissingField(Field),

    #[error("descriptor element <{0}> is empty")]
    #[diagnostic(code(tytest::descriptor::empty_field))]
    EmptyField(Field),
}

impl DescriptorError {
    /// Structural errors are reported for the single test and the batch continues.
    ///
    /// Missing or empty fields are not structural: they are precondition violations that abort the
    /// whole run before any tool is invoked.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            DescriptorError::Io { .. } | DescriptorError::Syntax { .. } | DescriptorError::WrongRoot { .. }
        )
    }
}

/// Read and parse the descriptor at `path`.
pub fn read_descriptor(path: &Path) -> Result<Descriptor, DescriptorError> {
    let text = fs::read_to_string(path).map_err(|source| DescriptorError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_descriptor(&path.display().to_string(), &text)
}

/// Parse descriptor text. `name` is only used to label syntax errors.
///
/// Unknown child elements are ignored. When a field appears more than once the last
/// occurrence wins.
pub fn parse_descriptor(name: &str, text: &str) -> Result<Descriptor, DescriptorError> {
    let doc = roxmltree::Document::parse(text).map_err(|e| syntax_error(name, text, &e))?;

    let root = doc.root_element();
    if root.tag_name().name() != ROOT_ELEMENT {
        return Err(DescriptorError::WrongRoot {
            found: root.tag_name().name().to_string(),
        });
    }

    let mut fields: [Option<String>; 3] = [None, None, None];
    for child in root.children().filter(|n| n.is_element()) {
        if let Some(field) = Field::from_tag(child.tag_name().name()) {
            fields[field as usize] = Some(element_text(child));
        }
    }

    let [sample, expected, checker] = fields;
    Ok(Descriptor {
        sample: require(Field::Sample, sample)?,
        expected: require(Field::Expected, expected)?,
        checker: require(Field::Checker, checker)?,
    })
}

/// Text content of `node` up to its first child element.
///
/// Comments and processing instructions are skipped, so the text around them is joined.
fn element_text(node: roxmltree::Node<'_, '_>) -> String {
    node.children()
        .take_while(|n| !n.is_element())
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

fn require(field: Field, value: Option<String>) -> Result<String, DescriptorError> {
    match value {
        None => Err(DescriptorError::MissingField(field)),
        Some(text) if text.is_empty() => Err(DescriptorError::EmptyField(field)),
        Some(text) => Ok(text),
    }
}

fn syntax_error(name: &str, text: &str, err: &roxmltree::Error) -> DescriptorError {
    let pos = err.pos();
    let offset = byte_offset(text, pos.row as usize, pos.col as usize);
    DescriptorError::Syntax {
        message: err.to_string(),
        src: NamedSource::new(name, text.to_string()),
        span: SourceSpan::from(offset..offset),
    }
}

/// Convert a 1-based (row, column) position into a byte offset, clamped to the text length.
fn byte_offset(text: &str, row: usize, col: usize) -> usize {
    let line_start: usize = text
        .split_inclusive('\n')
        .take(row.saturating_sub(1))
        .map(str::len)
        .sum();
    let line = text[line_start..].lines().next().unwrap_or_default();
    let col_offset = line
        .char_indices()
        .nth(col.saturating_sub(1))
        .map_or(line.len(), |(i, _)| i);
    (line_start + col_offset).min(text.len())
}
