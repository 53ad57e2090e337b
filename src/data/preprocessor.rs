// ============================================================
// Layer 4 - Text Preprocessor
// ============================================================
// Normalises one prompt or response field before tokenisation.
//
// Records are single lines, so a field never legitimately holds
// a line break. Cleaning steps:
//   1. Unicode space variants (NBSP, zero-width, BOM) -> space
//   2. Control characters (including stray \r and \n) -> space
//   3. Runs of spaces collapse to one
//   4. Leading/trailing spaces are trimmed
//
// Without this the tokenizer spends ids on invisible characters
// and identical prompts can encode differently.
//
// Reference: Rust Book §8 (Strings in Rust)

pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Clean a single record field.
    pub fn clean(&self, text: &str) -> String {
        let mut out        = String::with_capacity(text.len());
        let mut last_space = true; // swallows leading spaces

        for c in text.chars() {
            let c = match c {
                '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
                c if c.is_control() => ' ',
                c => c,
            };
            if c == ' ' {
                if !last_space {
                    out.push(' ');
                }
                last_space = true;
            } else {
                out.push(c);
                last_space = false;
            }
        }

        // at most one trailing space can survive the loop
        if out.ends_with(' ') {
            out.pop();
        }
        out
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}
