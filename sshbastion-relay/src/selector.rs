/// Pure parsing logic behind the interactive selector's input handling,
/// extracted so it can be unit-tested without a live
/// SSH channel: trims the line, parses it as a 1-based index, and returns
/// the corresponding key.
pub fn parse_selection(line: &str, keys: &[String]) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let index: usize = trimmed.parse().ok()?;
    if index == 0 {
        return None;
    }
    keys.get(index - 1).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Vec<String> {
        vec!["db1".to_owned(), "web1".to_owned()]
    }

    #[test]
    fn selects_by_one_based_index() {
        assert_eq!(parse_selection("1", &keys()), Some("db1".to_owned()));
        assert_eq!(parse_selection("2", &keys()), Some("web1".to_owned()));
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(parse_selection("  1  \r\n", &keys()), Some("db1".to_owned()));
    }

    #[test]
    fn rejects_zero() {
        assert_eq!(parse_selection("0", &keys()), None);
    }

    #[test]
    fn rejects_out_of_range() {
        assert_eq!(parse_selection("3", &keys()), None);
    }

    #[test]
    fn rejects_non_numeric() {
        assert_eq!(parse_selection("db1", &keys()), None);
    }

    #[test]
    fn rejects_blank_input() {
        assert_eq!(parse_selection("   ", &keys()), None);
    }
}
