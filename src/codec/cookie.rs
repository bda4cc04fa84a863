//! The `Cookie` header sub-parser.
//!
//! Based on RFC 2109. Cookie names are lowercased on insert, unquoted
//! whitespace is skipped, and attribute pairs whose name begins with `$`
//! (`$Path`, `$Domain`, ...) are parsed but not inserted. Both `;` and `,`
//! act as pair separators, matching what legacy user agents produced.

use crate::limits::{is_control, COOKIE_NAME_MAX, COOKIE_VALUE_MAX};
use crate::protocol::Dictionary;

/// Parses one `Cookie` header value into `dict`.
///
/// Returns false on a control byte or an over-limit name or value; `dict`
/// may hold a partial result in that case.
pub fn parse_cookie_header(dict: &mut Dictionary, header_value: &str) -> bool {
    enum State {
        Name,
        Value,
        Ignore,
    }
    let mut state = State::Name;

    let mut name = String::new();
    let mut value = String::new();
    let mut quote: Option<char> = None;

    for c in header_value.chars() {
        match state {
            State::Name => {
                if c == '=' {
                    if name.is_empty() {
                        return false;
                    }
                    quote = None;
                    state = State::Value;
                } else if c == ';' || c == ',' {
                    // empty names occur naturally after quoted values
                    if !name.is_empty() {
                        if !name.starts_with('$') {
                            dict.add_value(name.clone(), value.clone());
                        }
                        name.clear();
                    }
                } else if c != ' ' {
                    if is_control(ascii(c)) || name.len() >= COOKIE_NAME_MAX {
                        return false;
                    }
                    // cookie names are case-insensitive
                    name.push(c.to_ascii_lowercase());
                }
            }

            State::Value => {
                if let Some(q) = quote {
                    if c == q {
                        if !name.starts_with('$') {
                            dict.add_value(name.clone(), value.clone());
                        }
                        name.clear();
                        value.clear();
                        state = State::Ignore;
                    } else if value.len() >= COOKIE_VALUE_MAX {
                        return false;
                    } else {
                        value.push(c);
                    }
                } else if c == ';' || c == ',' {
                    if !name.starts_with('$') {
                        dict.add_value(name.clone(), value.clone());
                    }
                    name.clear();
                    value.clear();
                    state = State::Name;
                } else if c == '\'' || c == '"' {
                    if value.is_empty() {
                        quote = Some(c);
                    } else if value.len() >= COOKIE_VALUE_MAX {
                        return false;
                    } else {
                        value.push(c);
                    }
                } else if c != ' ' {
                    if is_control(ascii(c)) || value.len() >= COOKIE_VALUE_MAX {
                        return false;
                    }
                    value.push(c);
                }
            }

            State::Ignore => {
                if c == ';' || c == ',' {
                    state = State::Name;
                }
            }
        }
    }

    // flush the last cookie
    if !name.is_empty() && !name.starts_with('$') {
        dict.add_value(name, value);
    }

    true
}

/// Maps a char onto a byte for the control-class check; non-ASCII chars
/// are never controls.
fn ascii(c: char) -> u8 {
    if c.is_ascii() {
        c as u8
    } else {
        b'a'
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Option<Dictionary> {
        let mut dict = Dictionary::new();
        parse_cookie_header(&mut dict, input).then_some(dict)
    }

    #[test]
    fn simple_pairs() {
        let dict = parse("A=1; B=2").unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get_value("a"), "1");
        assert_eq!(dict.get_value("b"), "2");
    }

    #[test]
    fn names_are_lowercased() {
        let dict = parse("SessionID=abc").unwrap();
        assert_eq!(dict.get_value("sessionid"), "abc");
        assert_eq!(dict.get_value("SessionID"), "");
    }

    #[test]
    fn quoted_values() {
        let dict = parse("A=1; B=\"two\"").unwrap();
        assert_eq!(dict.get_value("a"), "1");
        assert_eq!(dict.get_value("b"), "two");

        let dict = parse("name='quoted value'").unwrap();
        assert_eq!(dict.get_value("name"), "quoted value");
    }

    #[test]
    fn quoted_value_may_hold_separators() {
        let dict = parse("a=\"x; y, z\"; b=2").unwrap();
        assert_eq!(dict.get_value("a"), "x; y, z");
        assert_eq!(dict.get_value("b"), "2");
    }

    #[test]
    fn dollar_attributes_are_filtered() {
        let dict = parse("Customer=WILE_E_COYOTE; $Path=/acme; $Domain=example.com").unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get_value("customer"), "WILE_E_COYOTE");
        assert_eq!(dict.get_value("$path"), "");
        assert_eq!(dict.get_value("$domain"), "");
    }

    #[test]
    fn comma_acts_as_separator() {
        let dict = parse("a=1, b=2").unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get_value("a"), "1");
        assert_eq!(dict.get_value("b"), "2");
    }

    #[test]
    fn unquoted_whitespace_is_skipped() {
        let dict = parse("  a  =  1 2  ").unwrap();
        assert_eq!(dict.get_value("a"), "12");
    }

    #[test]
    fn empty_value_is_ok() {
        let dict = parse("a=; b=2").unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get_value("a"), "");
    }

    #[test]
    fn name_without_value_is_flushed() {
        let dict = parse("lonely").unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get_value("lonely"), "");
    }

    #[test]
    fn empty_name_fails() {
        assert!(parse("=1").is_none());
    }

    #[test]
    fn control_byte_fails() {
        assert!(parse("a=\x01").is_none());
    }

    #[test]
    fn over_limit_name_fails() {
        let long = "n".repeat(COOKIE_NAME_MAX + 1);
        assert!(parse(&format!("{long}=v")).is_none());
    }

    #[test]
    fn values_keep_case() {
        let dict = parse("Customer=WILE_E_COYOTE").unwrap();
        assert_eq!(dict.get_value("customer"), "WILE_E_COYOTE");
    }
}
