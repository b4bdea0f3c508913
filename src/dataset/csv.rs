//! Minimal quote-aware CSV field splitting.

/// Split a CSV line respecting quoted fields (handles commas inside quotes).
/// Returns owned strings because quoted fields need unquoting.
pub fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    // Escaped quote ("")
                    if chars.peek() == Some(&'"') {
                        current.push('"');
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Quote a field for writing if it contains a delimiter or quote.
pub fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fields() {
        assert_eq!(split_line("a,b,,c"), vec!["a", "b", "", "c"]);
    }

    #[test]
    fn quoted_comma_and_escaped_quote() {
        assert_eq!(
            split_line(r#"1,"x, y","say ""hi""""#),
            vec!["1", "x, y", "say \"hi\""]
        );
    }

    #[test]
    fn escape_is_inverse_of_split() {
        let field = "port \"22\", tcp";
        assert_eq!(split_line(&escape_field(field)), vec![field]);
    }
}
