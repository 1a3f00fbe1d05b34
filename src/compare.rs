//! Output comparison
//!
//! Captured program outputs are compared byte-for-byte. A mismatch carries a simple
//! line-by-line report: `-` lines come from the expected output, `+` lines from the actual one.

/// Result of comparing expected and actual program output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    Match,
    Mismatch { diff: String },
}

impl Comparison {
    pub fn is_match(&self) -> bool {
        matches!(self, Comparison::Match)
    }
}

/// Compare two captured outputs.
pub fn compare_outputs(expected: &[u8], actual: &[u8]) -> Comparison {
    if expected == actual {
        Comparison::Match
    } else {
        Comparison::Mismatch {
            diff: output_diff(expected, actual),
        }
    }
}

/// Line diff of two outputs.
///
/// Lines are paired by position. When the texts only differ in bytes the line view cannot show
/// (trailing newline, carriage returns), a note says so instead of an empty report.
pub fn output_diff(expected: &[u8], actual: &[u8]) -> String {
    let expected = String::from_utf8_lossy(expected);
    let actual = String::from_utf8_lossy(actual);

    let mut diff = String::new();
    let expected_lines: Vec<&str> = expected.lines().collect();
    let actual_lines: Vec<&str> = actual.lines().collect();

    let max_lines = expected_lines.len().max(actual_lines.len());

    for i in 0..max_lines {
        let exp = expected_lines.get(i);
        let act = actual_lines.get(i);

        if exp != act {
            if let Some(exp) = exp {
                diff.push_str(&format!("-{:4} | {}\n", i + 1, exp));
            }
            if let Some(act) = act {
                diff.push_str(&format!("+{:4} | {}\n", i + 1, act));
            }
        }
    }

    if diff.is_empty() {
        diff.push_str(&format!(
            "outputs differ in line endings or trailing whitespace ({} vs {} bytes)\n",
            expected.len(),
            actual.len()
        ));
    }

    diff
}
