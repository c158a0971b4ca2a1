use std::borrow::Cow;

mod parsers;
mod scanner;

use parsers::{
    is_block_comment_end, is_block_comment_start, is_line_comment_start, is_not_a_placeholder,
};
use scanner::{State, scan_identifier};

/// Translate named T-SQL placeholders (`@Name`) into the positional form the
/// driver binds (`@P1`, `@P2`, ...).
///
/// `names[i]` becomes `@P{i + 1}`. Matching is case-insensitive, as SQL
/// Server compares variable names. Placeholders that match no name are left
/// untouched so locally declared variables keep working; an unbound one fails
/// on the server with "Must declare the scalar variable".
///
/// String literals, quoted and bracketed identifiers, comments and `@@`
/// system functions are skipped:
/// ```rust
/// use sql_tasks::translation::translate_named_placeholders;
///
/// let sql = "select '@Name', [@Name] from t where a = @name and b = @@ROWCOUNT";
/// assert_eq!(
///     translate_named_placeholders(sql, &["Name"]),
///     "select '@Name', [@Name] from t where a = @P1 and b = @@ROWCOUNT"
/// );
/// ```
/// Returns a borrowed `Cow` when no changes are needed.
#[must_use]
pub fn translate_named_placeholders<'a, S: AsRef<str>>(sql: &'a str, names: &[S]) -> Cow<'a, str> {
    if names.is_empty() {
        return Cow::Borrowed(sql);
    }

    let mut out: Option<String> = None;
    // start of the not-yet-copied tail of `sql`
    let mut copied = 0;
    let mut state = State::Normal;
    let mut idx = 0;
    let bytes = sql.as_bytes();

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'[' => state = State::Bracketed,
                _ if is_line_comment_start(bytes, idx) => {
                    state = State::LineComment;
                    idx += 1;
                }
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'@' if !is_not_a_placeholder(bytes, idx) => {
                    if let Some(end) = scan_identifier(bytes, idx + 1) {
                        let name = &sql[idx + 1..end];
                        if let Some(pos) = names
                            .iter()
                            .position(|n| n.as_ref().eq_ignore_ascii_case(name))
                        {
                            let buf = out.get_or_insert_with(|| String::with_capacity(sql.len()));
                            buf.push_str(&sql[copied..idx]);
                            buf.push_str("@P");
                            buf.push_str(&(pos + 1).to_string());
                            copied = end;
                        }
                        idx = end;
                        continue;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1; // skip escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::Bracketed => {
                if b == b']' {
                    if bytes.get(idx + 1) == Some(&b']') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_block_comment_end(bytes, idx) {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
        }

        idx += 1;
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&sql[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(sql),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_named_to_positional() {
        let sql = "INSERT INTO Test VALUES(@Id, @LastName, @FirstName);";
        let res = translate_named_placeholders(sql, &["LastName", "FirstName", "Id"]);
        assert_eq!(res, "INSERT INTO Test VALUES(@P3, @P1, @P2);");
    }

    #[test]
    fn matches_names_case_insensitively() {
        let sql = "select * FROM Test where LastName = @name";
        let res = translate_named_placeholders(sql, &["Name"]);
        assert_eq!(res, "select * FROM Test where LastName = @P1");
    }

    #[test]
    fn does_not_match_name_prefixes() {
        let sql = "select @Id, @IdOther";
        let res = translate_named_placeholders(sql, &["Id"]);
        assert_eq!(res, "select @P1, @IdOther");
    }

    #[test]
    fn skips_literals_comments_and_brackets() {
        let sql = "select 'it''s @a', N'@a', \"@a\", [x@a]]@a] -- @a\n/* @a /* @a */ @a */ from t where c = @a";
        let res = translate_named_placeholders(sql, &["a"]);
        assert_eq!(
            res,
            "select 'it''s @a', N'@a', \"@a\", [x@a]]@a] -- @a\n/* @a /* @a */ @a */ from t where c = @P1"
        );
    }

    #[test]
    fn leaves_system_functions_and_unknown_variables() {
        let sql = "declare @local int = @@ROWCOUNT; select @local, @a";
        let res = translate_named_placeholders(sql, &["a"]);
        assert_eq!(res, "declare @local int = @@ROWCOUNT; select @local, @P1");
    }

    #[test]
    fn keeps_non_ascii_text_intact() {
        let sql = "select 'äö' as x, @nimi as ß";
        let res = translate_named_placeholders(sql, &["nimi"]);
        assert_eq!(res, "select 'äö' as x, @P1 as ß");
    }

    #[test]
    fn borrows_when_nothing_changes() {
        let sql = "select 1";
        assert!(matches!(
            translate_named_placeholders(sql, &["a"]),
            Cow::Borrowed(_)
        ));
        let none: [&str; 0] = [];
        assert!(matches!(
            translate_named_placeholders("select @a", &none),
            Cow::Borrowed(_)
        ));
    }
}
