//! Statement Parser
//!
//! Builds a small token tree over the lexer output and walks it to find
//! statement boundaries, CTE bindings and the base tables a query reads.
//!
//! The tree has four node kinds: plain tokens, (qualified) names,
//! parenthesized groups and function calls. A `FROM` that sits directly in
//! a function's argument list (`EXTRACT(MONTH FROM ts)`) never introduces a
//! table; groups nested inside those arguments are still walked, so a
//! scalar subquery passed to a function is not a blind spot.
//!
//! A `FROM` clause is read up to the next clause keyword at its own level:
//! every item after a comma or a `JOIN` is a source, whatever join
//! qualifiers, sampling clauses or aliases come in between.

use super::lexer::{significant_tokens, Token, TokenKind};
use sqlparser::tokenizer::TokenizerError;
use std::collections::{BTreeSet, HashSet};

/// Groups nested deeper than this are flattened into plain tokens.
const MAX_NESTING: usize = 256;

/// Reserved words. Anything else that looks like a word is treated as an
/// identifier (and becomes a function call when followed by a parenthesis).
const RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "between",
    "both", "case", "cast", "check", "collate", "column", "constraint", "create", "cross",
    "current_date", "current_role", "current_time", "current_timestamp", "current_user",
    "default", "delete", "desc", "distinct", "do", "else", "end", "except", "exists", "false",
    "fetch", "for", "foreign", "from", "full", "grant", "group", "having", "ilike", "in",
    "inner", "insert", "intersect", "into", "is", "isnull", "join", "lateral", "leading",
    "left", "like", "limit", "localtime", "localtimestamp", "natural", "not", "notnull",
    "null", "offset", "on", "only", "or", "order", "outer", "overlaps", "placing", "primary",
    "references", "returning", "right", "select", "session_user", "similar", "some",
    "symmetric", "table", "tablesample", "then", "to", "trailing", "true", "union", "unique",
    "update", "user", "using", "values", "variadic", "when", "where", "window", "with",
];

/// Words allowed between `FROM`/`JOIN` and the table they introduce.
const SOURCE_MODIFIERS: &[&str] = &[
    "lateral", "only", "natural", "inner", "left", "right", "full", "cross", "outer",
];

/// Words that end a `FROM` clause at its own nesting level.
const FROM_TERMINATORS: &[&str] = &[
    "where", "group", "having", "window", "order", "limit", "offset", "fetch", "for", "union",
    "intersect", "except", "returning", "into",
];

pub fn is_reserved(word: &str) -> bool {
    RESERVED_WORDS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(word))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Token(Token),
    /// `name` or `schema.name` (quoted parts allowed).
    Name(Vec<Token>),
    Group(Vec<Node>),
    Function { name: Vec<Token>, args: Vec<Node> },
}

impl Node {
    /// True for an unquoted word, whether it was read as a keyword or as a
    /// single-part name (non-reserved keywords like `RECURSIVE`).
    fn is_word(&self, word: &str) -> bool {
        match self {
            Node::Token(token) => token.is_word(word),
            Node::Name(parts) => parts.len() == 1 && parts[0].is_word(word),
            _ => false,
        }
    }

    fn is_kind(&self, kind: TokenKind) -> bool {
        matches!(self, Node::Token(token) if token.kind == kind)
    }

    fn is_operator(&self, text: &str) -> bool {
        matches!(self, Node::Token(token) if token.kind == TokenKind::Operator && token.text == text)
    }

    fn is_any_word(&self, words: &[&str]) -> bool {
        words.iter().any(|word| self.is_word(word))
    }
}

/// A base table reference, case-folded and unquoted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn bare(&self) -> &str {
        &self.name
    }

    pub fn qualified(&self) -> Option<String> {
        self.schema
            .as_ref()
            .map(|schema| format!("{}.{}", schema, self.name))
    }

    /// Every identity this reference answers to for allowlist matching.
    pub fn identities(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(2);
        if let Some(qualified) = self.qualified() {
            ids.push(qualified);
        }
        ids.push(self.name.clone());
        ids
    }
}

/// Structural summary of a SQL string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSql {
    pub statement_count: usize,
    /// Names bound by a leading `WITH [RECURSIVE]` clause.
    pub cte_names: BTreeSet<String>,
    /// Base tables, with CTE references already resolved away.
    pub table_refs: BTreeSet<TableRef>,
}

impl ParsedSql {
    /// Bare and qualified identities of every referenced table.
    pub fn referenced_tables(&self) -> BTreeSet<String> {
        self.table_refs
            .iter()
            .flat_map(|table| table.identities())
            .collect()
    }
}

pub fn parse_sql(sql: &str) -> Result<ParsedSql, TokenizerError> {
    Ok(parse_tokens(&significant_tokens(sql)?))
}

/// Structural summary of already tokenized SQL (trivia removed).
pub fn parse_tokens(tokens: &[Token]) -> ParsedSql {
    let mut parsed = ParsedSql::default();

    for statement in split_statements(tokens) {
        parsed.statement_count += 1;
        let tree = build_tree(statement);
        if let Some(first) = tree.first() {
            if first.is_word("with") {
                let (names, _) = read_with_clause(&tree);
                parsed.cte_names.extend(names.into_iter().map(|(name, _)| name));
            }
        }
        walk_query(&tree, &HashSet::new(), &mut parsed.table_refs);
    }

    parsed
}

/// Number of non-empty statements separated by semicolons outside literals
/// and comments.
pub fn statement_count(sql: &str) -> Result<usize, TokenizerError> {
    Ok(split_statements(&significant_tokens(sql)?).len())
}

pub fn extract_cte_names(sql: &str) -> Result<BTreeSet<String>, TokenizerError> {
    Ok(parse_sql(sql)?.cte_names)
}

pub fn extract_referenced_tables(sql: &str) -> Result<BTreeSet<String>, TokenizerError> {
    Ok(parse_sql(sql)?.referenced_tables())
}

/// Lower-cased unquoted words in order, skipping words that follow a `.`
/// (those are column or field names, never SQL verbs). String literals,
/// quoted identifiers and comments never contribute.
pub fn keyword_stream(tokens: &[Token]) -> Vec<String> {
    tokens
        .iter()
        .enumerate()
        .filter(|(idx, token)| {
            token.kind == TokenKind::Word
                && !(*idx > 0 && tokens[idx - 1].kind == TokenKind::Dot)
        })
        .map(|(_, token)| token.text.to_lowercase())
        .collect()
}

fn split_statements(tokens: &[Token]) -> Vec<&[Token]> {
    tokens
        .split(|token| token.kind == TokenKind::Semicolon)
        .filter(|statement| !statement.is_empty())
        .collect()
}

pub fn build_tree(tokens: &[Token]) -> Vec<Node> {
    let mut pos = 0;
    let mut nodes = Vec::new();
    // Stray closing parentheses at the top level are kept as plain tokens.
    while pos < tokens.len() {
        nodes.extend(parse_nodes(tokens, &mut pos, 0));
        if pos < tokens.len() {
            nodes.push(Node::Token(tokens[pos].clone()));
            pos += 1;
        }
    }
    nodes
}

/// Parse until the matching `)` (consumed) or end of input.
fn parse_nodes(tokens: &[Token], pos: &mut usize, depth: usize) -> Vec<Node> {
    let mut nodes = Vec::new();
    while *pos < tokens.len() {
        let token = &tokens[*pos];
        match token.kind {
            TokenKind::RParen if depth > 0 => {
                *pos += 1;
                return nodes;
            }
            TokenKind::RParen => return nodes,
            TokenKind::LParen if depth < MAX_NESTING => {
                *pos += 1;
                nodes.push(Node::Group(parse_nodes(tokens, pos, depth + 1)));
            }
            TokenKind::QuotedIdent => nodes.push(read_name(tokens, pos, depth)),
            TokenKind::Word if !is_reserved(&token.text) => {
                nodes.push(read_name(tokens, pos, depth))
            }
            _ => {
                nodes.push(Node::Token(token.clone()));
                *pos += 1;
            }
        }
    }
    nodes
}

fn read_name(tokens: &[Token], pos: &mut usize, depth: usize) -> Node {
    let mut parts = vec![tokens[*pos].clone()];
    *pos += 1;
    while *pos + 1 < tokens.len() && tokens[*pos].kind == TokenKind::Dot {
        let next = &tokens[*pos + 1];
        let is_part = matches!(next.kind, TokenKind::Word | TokenKind::QuotedIdent)
            || (next.kind == TokenKind::Operator && next.text == "*");
        if !is_part {
            break;
        }
        parts.push(next.clone());
        *pos += 2;
    }

    if depth < MAX_NESTING && tokens.get(*pos).is_some_and(|t| t.kind == TokenKind::LParen) {
        *pos += 1;
        let args = parse_nodes(tokens, pos, depth + 1);
        return Node::Function { name: parts, args };
    }
    Node::Name(parts)
}

type CteScope = HashSet<String>;

/// Walk a query-shaped node list: an optional `WITH` clause followed by a
/// body. CTE names shadow bare table names only where SQL makes them
/// visible: in the body, in later CTEs, and (for `RECURSIVE`) in every CTE.
fn walk_query(nodes: &[Node], outer: &CteScope, refs: &mut BTreeSet<TableRef>) {
    if !nodes.first().is_some_and(|node| node.is_word("with")) {
        walk_clauses(nodes, outer, refs, false);
        return;
    }

    let (bindings, body_start) = read_with_clause(nodes);
    let recursive = nodes.get(1).is_some_and(|node| node.is_word("recursive"));
    let names: Vec<&String> = bindings.iter().map(|(name, _)| name).collect();

    for (idx, (_, body)) in bindings.iter().enumerate() {
        let visible_count = if recursive { names.len() } else { idx };
        let mut scope = outer.clone();
        scope.extend(names[..visible_count].iter().map(|name| (*name).clone()));
        walk_query(body, &scope, refs);
    }

    let mut scope = outer.clone();
    scope.extend(names.into_iter().cloned());
    walk_clauses(&nodes[body_start..], &scope, refs, false);
}

/// Parse `WITH [RECURSIVE] name [(cols)] AS [[NOT] MATERIALIZED] (body), ...`.
/// Returns the bindings and the index where the main body starts.
fn read_with_clause(nodes: &[Node]) -> (Vec<(String, &[Node])>, usize) {
    let mut bindings = Vec::new();
    let mut i = 1;
    if nodes.get(i).is_some_and(|node| node.is_word("recursive")) {
        i += 1;
    }

    loop {
        let name = match nodes.get(i) {
            Some(Node::Name(parts)) if parts.len() == 1 => parts[0].normalized(),
            // `name(col_a, col_b)` reads as a call.
            Some(Node::Function { name, .. }) if name.len() == 1 => name[0].normalized(),
            _ => break,
        };
        i += 1;
        if matches!(nodes.get(i), Some(Node::Group(_))) {
            i += 1;
        }
        if !nodes.get(i).is_some_and(|node| node.is_word("as")) {
            break;
        }
        i += 1;
        if nodes.get(i).is_some_and(|node| node.is_word("not")) {
            i += 1;
        }
        if nodes.get(i).is_some_and(|node| node.is_word("materialized")) {
            i += 1;
        }
        let Some(Node::Group(body)) = nodes.get(i) else {
            break;
        };
        bindings.push((name, body.as_slice()));
        i += 1;
        if nodes.get(i).is_some_and(|node| node.is_kind(TokenKind::Comma)) {
            i += 1;
            continue;
        }
        break;
    }

    (bindings, i)
}

/// Walk clause-level nodes. In `function_args` mode `FROM`/`JOIN` do not
/// introduce tables (the list belongs to a call like `EXTRACT` or `TRIM`).
fn walk_clauses(
    nodes: &[Node],
    scope: &CteScope,
    refs: &mut BTreeSet<TableRef>,
    function_args: bool,
) {
    for (idx, node) in nodes.iter().enumerate() {
        match node {
            Node::Token(token) if !function_args => {
                if token.is_word("join")
                    || (token.is_word("from") && !is_distinct_from(nodes, idx))
                {
                    read_from_items(&nodes[idx + 1..], scope, refs);
                } else if token.is_word("table") {
                    // `TABLE name` is shorthand for `SELECT * FROM name`.
                    if let Some(Node::Name(parts)) = nodes.get(idx + 1) {
                        refs.extend(table_ref(parts, scope));
                    }
                }
            }
            Node::Group(children) => walk_query(children, scope, refs),
            Node::Function { args, .. } => {
                if starts_query(args) {
                    walk_query(args, scope, refs);
                } else {
                    walk_clauses(args, scope, refs, true);
                }
            }
            _ => {}
        }
    }
}

fn starts_query(nodes: &[Node]) -> bool {
    nodes
        .first()
        .is_some_and(|node| node.is_word("select") || node.is_word("with"))
}

/// Groups that hold a query of their own rather than a joined table list.
fn is_query_group(children: &[Node]) -> bool {
    starts_query(children)
        || children
            .first()
            .is_some_and(|node| node.is_word("values") || node.is_word("table"))
}

/// `a IS [NOT] DISTINCT FROM b` is a comparison, not a table source.
fn is_distinct_from(nodes: &[Node], from_idx: usize) -> bool {
    if from_idx < 2 || !nodes[from_idx - 1].is_word("distinct") {
        return false;
    }
    let before = &nodes[from_idx - 2];
    before.is_word("is") || before.is_word("not")
}

/// Read a `FROM` item list up to the next clause keyword. The first node
/// (after modifiers) of each item is its source; everything else in the
/// item, such as aliases, `ON`/`USING`, `TABLESAMPLE` or `WITH ORDINALITY`,
/// is skipped. Subqueries in those positions are walked by the caller.
fn read_from_items(nodes: &[Node], scope: &CteScope, refs: &mut BTreeSet<TableRef>) {
    let mut expect_source = true;
    let mut brackets = 0usize;

    for node in nodes {
        if node.is_operator("[") {
            brackets += 1;
            continue;
        }
        if node.is_operator("]") {
            brackets = brackets.saturating_sub(1);
            continue;
        }
        if brackets > 0 {
            continue;
        }
        if node.is_any_word(FROM_TERMINATORS)
            || node.is_kind(TokenKind::RParen)
            || node.is_kind(TokenKind::Semicolon)
        {
            return;
        }

        if expect_source {
            if node.is_any_word(SOURCE_MODIFIERS) {
                continue;
            }
            match node {
                Node::Name(parts) => refs.extend(table_ref(parts, scope)),
                // `(a JOIN b ON ...)` is a parenthesized table list.
                Node::Group(children) if !is_query_group(children) => {
                    read_from_items(children, scope, refs)
                }
                // Derived tables and set-returning functions are not base
                // tables.
                _ => {}
            }
            expect_source = false;
        } else if node.is_kind(TokenKind::Comma) || node.is_word("join") {
            expect_source = true;
        }
    }
}

fn table_ref(parts: &[Token], scope: &CteScope) -> Option<TableRef> {
    let mut normalized: Vec<String> = parts.iter().map(|part| part.normalized()).collect();
    let name = normalized.pop()?;
    if name.is_empty() || name == "*" {
        return None;
    }
    if normalized.is_empty() {
        if scope.contains(&name) {
            return None;
        }
        return Some(TableRef { schema: None, name });
    }
    Some(TableRef {
        schema: Some(normalized.join(".")),
        name,
    })
}
