//! Best-effort dead code elimination on raw module source.
//!
//! The pass folds `if (true)` / `if (false)` branches and then removes import
//! declarations whose bindings are no longer referenced. It works on source
//! text: anything it cannot scan confidently (unterminated strings or comments,
//! unbalanced brackets) is returned unchanged.

/// Removes statically dead code from a module source.
///
/// Implementations must be total: malformed input is returned as-is.
pub trait Eliminator: Send + Sync {
    fn eliminate(&self, source: &str) -> String;
}

impl<F: Fn(&str) -> String + Send + Sync> Eliminator for F {
    fn eliminate(&self, source: &str) -> String {
        self(source)
    }
}

/// The default [`Eliminator`], see [`eliminate_dead_code`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DeadCodeEliminator;

impl Eliminator for DeadCodeEliminator {
    fn eliminate(&self, source: &str) -> String {
        eliminate_dead_code(source)
    }
}

/// Folds constant branches, then strips unused imports.
///
/// Idempotent: `eliminate_dead_code(&eliminate_dead_code(s)) == eliminate_dead_code(s)`.
pub fn eliminate_dead_code(source: &str) -> String {
    let Some(mut regions) = scan(source) else {
        return source.to_string();
    };
    let mut source = source.to_string();

    while let Some(folded) = fold_constant_branch(&source, &regions) {
        match scan(&folded) {
            Some(next) => {
                source = folded;
                regions = next;
            }
            None => break,
        }
    }

    loop {
        let stripped = strip_unused_imports(&source, &regions);
        if stripped == source {
            return source;
        }
        match scan(&stripped) {
            Some(next) => {
                source = stripped;
                regions = next;
            }
            None => return stripped,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Region {
    Code,
    Comment,
    Str,
}

/// Classifies every byte of `source`. Returns `None` when the source is not
/// balanced.
fn scan(source: &str) -> Option<Vec<Region>> {
    #[derive(PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Str(char),
    }

    let mut regions = vec![Region::Code; source.len()];
    let mut brackets = Vec::new();
    let mut state = State::Code;
    let mut escaped = false;
    let mut chars = source.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let next = chars.peek().map(|(_, c)| *c);
        let region = match state {
            State::Code => match c {
                '/' if next == Some('/') => {
                    state = State::LineComment;
                    Region::Comment
                }
                '/' if next == Some('*') => {
                    chars.next();
                    regions[idx + 1] = Region::Comment;
                    state = State::BlockComment;
                    Region::Comment
                }
                '\'' | '"' | '`' => {
                    state = State::Str(c);
                    Region::Str
                }
                '(' | '[' | '{' => {
                    brackets.push(c);
                    Region::Code
                }
                ')' | ']' | '}' => {
                    let open = brackets.pop()?;
                    if !matches!((open, c), ('(', ')') | ('[', ']') | ('{', '}')) {
                        return None;
                    }
                    Region::Code
                }
                _ => Region::Code,
            },
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                    Region::Code
                } else {
                    Region::Comment
                }
            }
            State::BlockComment => {
                if c == '*' && next == Some('/') {
                    chars.next();
                    regions[idx + 1] = Region::Comment;
                    state = State::Code;
                }
                Region::Comment
            }
            State::Str(quote) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    state = State::Code;
                } else if c == '\n' && quote != '`' {
                    return None;
                }
                Region::Str
            }
        };
        regions[idx..idx + c.len_utf8()].fill(region);
    }

    let closed = matches!(state, State::Code | State::LineComment);
    (closed && brackets.is_empty()).then_some(regions)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// `true` if `word` starts at `idx` as a whole keyword in code.
fn keyword_at(source: &str, regions: &[Region], idx: usize, word: &str) -> bool {
    regions.get(idx) == Some(&Region::Code)
        && source[idx..].starts_with(word)
        && !source[..idx].chars().next_back().is_some_and(is_ident_char)
        && !source[idx + word.len()..]
            .chars()
            .next()
            .is_some_and(is_ident_char)
}

fn skip_ws(source: &str, idx: usize) -> usize {
    idx + (source[idx..].len() - source[idx..].trim_start().len())
}

/// Index of the `}` closing the block opened at `open`.
fn block_end(source: &str, regions: &[Region], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, c) in source[open..].char_indices() {
        if regions[open + idx] != Region::Code {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Rewrites the first foldable `if (true|false) { .. }` statement.
fn fold_constant_branch(source: &str, regions: &[Region]) -> Option<String> {
    let candidates = source.match_indices("if").map(|(idx, _)| idx);

    for start in candidates {
        if !keyword_at(source, regions, start, "if") {
            continue;
        }
        let mut idx = skip_ws(source, start + 2);
        if !source[idx..].starts_with('(') {
            continue;
        }
        idx = skip_ws(source, idx + 1);
        let cond = if keyword_at(source, regions, idx, "true") {
            idx += 4;
            true
        } else if keyword_at(source, regions, idx, "false") {
            idx += 5;
            false
        } else {
            continue;
        };
        idx = skip_ws(source, idx);
        if !source[idx..].starts_with(')') {
            continue;
        }
        let open = skip_ws(source, idx + 1);
        if !source[open..].starts_with('{') {
            continue;
        }
        let close = block_end(source, regions, open)?;

        let after = skip_ws(source, close + 1);
        let has_else = keyword_at(source, regions, after, "else");
        let rest = if has_else { skip_ws(source, after + 4) } else { after };
        // An empty block keeps the statement slot filled when the `if` is the
        // body of a loop, a label or another branch.
        let (end, replacement) = match (cond, has_else) {
            (false, false) => (close + 1, "{}"),
            (false, true) => (rest, ""),
            (true, false) => (close + 1, &source[open..=close]),
            (true, true) if source[rest..].starts_with('{') => {
                let else_close = block_end(source, regions, rest)?;
                (else_close + 1, &source[open..=close])
            }
            (true, true) => continue,
        };

        return Some(format!("{}{replacement}{}", &source[..start], &source[end..]));
    }

    None
}

/// A top-level import declaration, as a byte range of the source.
struct Import {
    start: usize,
    end: usize,
    locals: Vec<String>,
}

/// Local names bound by an import clause (`a, { b as c }, * as d`).
fn local_bindings(clause: &str) -> Vec<String> {
    let clause = clause.strip_prefix("type ").unwrap_or(clause).trim();
    let (outside, inside) = match (clause.find('{'), clause.rfind('}')) {
        (Some(open), Some(close)) if open < close => (
            format!("{}{}", &clause[..open], &clause[close + 1..]),
            Some(&clause[open + 1..close]),
        ),
        _ => (clause.to_string(), None),
    };

    let mut locals = Vec::new();
    for part in outside.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.strip_prefix('*') {
            Some(ns) => locals.push(ns.trim().trim_start_matches("as").trim().to_string()),
            None => locals.push(part.to_string()),
        }
    }
    for spec in inside.into_iter().flat_map(|i| i.split(',')) {
        if let Some(local) = spec.split_whitespace().last() {
            locals.push(local.to_string());
        }
    }
    locals
}

fn find_imports(source: &str, regions: &[Region]) -> Vec<Import> {
    let mut imports = Vec::new();
    let mut next_free = 0;

    for (start, _) in source.match_indices("import") {
        if start < next_free || !keyword_at(source, regions, start, "import") {
            continue;
        }
        let gap = &source[..start];
        let statement_start = match gap.trim_end().chars().next_back() {
            None | Some(';') | Some('}') => true,
            Some(_) => gap[gap.trim_end().len()..].contains('\n'),
        };
        if !statement_start {
            continue;
        }
        let Some(quote) = (start..source.len()).find(|&i| regions[i] == Region::Str) else {
            continue;
        };
        let clause = source[start + 6..quote].trim();
        if clause.starts_with('(') || clause.starts_with('.') {
            continue;
        }
        let Some(close) = (quote + 1..source.len()).find(|&i| regions[i] != Region::Str) else {
            continue;
        };
        let mut end = close;
        let tail = &source[end..];
        let spaces = tail.len() - tail.trim_start_matches([' ', '\t']).len();
        if tail[spaces..].starts_with(';') {
            end += spaces + 1;
        }
        let line_rest = &source[end..];
        let eol = line_rest.find('\n').map_or(line_rest.len(), |i| i + 1);
        if line_rest[..eol].trim().is_empty() {
            end += eol;
        }

        let clause = clause
            .strip_suffix("from")
            .map(str::trim_end)
            .unwrap_or(clause);
        next_free = end;
        imports.push(Import {
            start,
            end,
            locals: local_bindings(clause),
        });
    }

    imports
}

/// Bindings compiled JSX refers to without naming them in the source.
const JSX_FACTORIES: [&str; 2] = ["createElement", "React"];

fn is_referenced(name: &str, text: &str) -> bool {
    if JSX_FACTORIES.contains(&name) {
        return true;
    }
    text.match_indices(name).any(|(idx, _)| {
        !text[..idx].chars().next_back().is_some_and(is_ident_char)
            && !text[idx + name.len()..]
                .chars()
                .next()
                .is_some_and(is_ident_char)
    })
}

/// Removes imports whose bindings are all unreferenced. Side-effect imports and
/// partially used imports are kept as written.
fn strip_unused_imports(source: &str, regions: &[Region]) -> String {
    let imports = find_imports(source, regions);

    let mut body = String::with_capacity(source.len());
    let mut cursor = 0;
    for import in &imports {
        body.push_str(&source[cursor..import.start]);
        cursor = import.end;
    }
    body.push_str(&source[cursor..]);

    let mut result = String::with_capacity(source.len());
    let mut cursor = 0;
    for import in &imports {
        let valid = import
            .locals
            .iter()
            .all(|local| !local.is_empty() && local.chars().all(is_ident_char));
        let unused = !import.locals.is_empty()
            && valid
            && import.locals.iter().all(|local| !is_referenced(local, &body));
        if unused {
            result.push_str(&source[cursor..import.start]);
            cursor = import.end;
        }
    }
    result.push_str(&source[cursor..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_unused_imports() {
        let source = "import { createElement } from 'rax';\nimport { isWeb } from 'universal-env';\nimport View from 'rax-view';\nimport './global.css';\n\nexport default () => <View />;\n";
        let expected = "import { createElement } from 'rax';\nimport View from 'rax-view';\nimport './global.css';\n\nexport default () => <View />;\n";
        assert_eq!(eliminate_dead_code(source), expected);
    }

    #[test]
    fn keeps_partially_used_imports() {
        let source = "import {\n  runApp,\n  useAppLaunch as onLaunch\n} from 'rax-app';\n\nrunApp({});\n";
        assert_eq!(eliminate_dead_code(source), source);

        let source = "import React, * as all from 'react';\nall.x();\n";
        assert_eq!(eliminate_dead_code(source), source);
    }

    #[test]
    fn folds_constant_branches() {
        let source = "import a from './a';\nimport b from './b';\nif (false) {\n  a();\n} else {\n  b();\n}\n";
        assert_eq!(
            eliminate_dead_code(source),
            "import b from './b';\n{\n  b();\n}\n"
        );

        let source = "if (true) { run(); } else { stop(); }\n";
        assert_eq!(eliminate_dead_code(source), "{ run(); }\n");

        let source = "if (ok) { run(); } else if (false) { stop(); }\n";
        assert_eq!(eliminate_dead_code(source), "if (ok) { run(); } else {}\n");

        let source = "if (false) { x(); } else if (ok) { y(); }\n";
        assert_eq!(eliminate_dead_code(source), "if (ok) { y(); }\n");
    }

    #[test]
    fn folded_branch_keeps_statement_slot() {
        let source = "while (x()) if (false) { y(); }\nz();\n";
        assert_eq!(eliminate_dead_code(source), "while (x()) {}\nz();\n");

        let source = "outer: if (false) { y(); }\nz();\n";
        assert_eq!(eliminate_dead_code(source), "outer: {}\nz();\n");

        let source = "if (ok) if (false) { y(); }\nz();\n";
        assert_eq!(eliminate_dead_code(source), "if (ok) {}\nz();\n");
    }

    #[test]
    fn imports_sharing_a_line() {
        let source = "import a from 'a'; import b from 'b';\nx();\n";
        assert_eq!(eliminate_dead_code(source), " x();\n");

        let source = "import a from 'a'; import b from 'b';\nb();\n";
        assert_eq!(eliminate_dead_code(source), " import b from 'b';\nb();\n");
    }

    #[test]
    fn ignores_strings_and_comments() {
        let source = "const s = \"if (false) { x }\";\n// import a from 'a';\nlet t = `if (true) {}`;\n";
        assert_eq!(eliminate_dead_code(source), source);

        let source = "import { x } from 'x';\nconst notUsed = 'x';\n";
        assert_eq!(eliminate_dead_code(source), source);
    }

    #[test]
    fn malformed_source_passes_through() {
        for source in [
            "import a from 'a';\nconst s = 'unterminated;\n",
            "import a from 'a';\nfunction f() {\n",
            "import a from 'a';\n/* open comment",
            "<Text>Don't</Text>",
            "if (false) { ] }",
        ] {
            assert_eq!(eliminate_dead_code(source), source);
        }
    }

    #[test]
    fn elimination_is_idempotent() {
        for source in [
            "import a from 'a';\nimport b from 'b';\nif (false) { a(); }\nb();\n",
            "if (true) { if (false) { x(); } y(); } else { z(); }\n",
            "import { unused } from 'u'\nimport 'side-effect'\nexport const x = 1;",
            "<App/>",
            "import a from 'a'; import b from 'b';\nx();\n",
            "while (x()) if (false) { y(); }\nz();\n",
        ] {
            let once = eliminate_dead_code(source);
            assert_eq!(eliminate_dead_code(&once), once);
        }
    }

    #[test]
    fn bindings_of_clauses() {
        assert_eq!(local_bindings("a"), ["a"]);
        assert_eq!(local_bindings("a, { b, c as d }"), ["a", "b", "d"]);
        assert_eq!(local_bindings("* as ns"), ["ns"]);
        assert_eq!(local_bindings("type { T }"), ["T"]);
        assert!(local_bindings("{}").is_empty());
    }
}
