//! Namespace alias assignment and identifier helpers.

use std::collections::{HashMap, HashSet};

const RUST_KEYWORDS: &[&str] = &[
    "as", "break", "const", "continue", "crate", "else", "enum", "extern", "false", "fn", "for",
    "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref", "return",
    "self", "Self", "static", "struct", "super", "trait", "true", "type", "unsafe", "use", "where",
    "while", "async", "await", "dyn",
];

pub fn is_keyword(word: &str) -> bool {
    RUST_KEYWORDS.contains(&word)
}

/// Maps output namespaces to short module aliases used in the generated
/// server. State is owned by the table instance so generator runs stay
/// isolated from each other.
///
/// Assignment rules, in order:
/// - a `path;alias` namespace carries its alias explicitly;
/// - otherwise the alias is the last path segment with `-` mapped to `_`;
/// - a namespace seen before always gets its previously assigned alias;
/// - a Rust keyword is suffixed with `_pb`;
/// - a collision with an already-used alias is suffixed with a counter
///   that increments per collision.
#[derive(Debug, Default)]
pub struct AliasTable {
    packages: HashMap<String, String>,
    used: HashSet<String>,
    collision_counter: u32,
}

impl AliasTable {
    pub fn alias_for(&mut self, namespace: &str) -> String {
        let (package, explicit) = match namespace.split_once(';') {
            Some((pkg, alias)) => (pkg, Some(alias.to_string())),
            None => (namespace, None),
        };

        if let Some(existing) = self.packages.get(package) {
            return existing.clone();
        }

        let mut alias = explicit.unwrap_or_else(|| {
            let last = package.rsplit('/').next().unwrap_or(package);
            last.replace('-', "_")
        });

        if is_keyword(&alias) {
            alias = format!("{alias}_pb");
        }

        if self.used.contains(&alias) {
            self.collision_counter += 1;
            alias = format!("{alias}{}", self.collision_counter);
        }

        self.packages.insert(package.to_string(), alias.clone());
        self.used.insert(alias.clone());
        alias
    }

    /// Returns the alias previously assigned to `namespace`, if any.
    pub fn get(&self, namespace: &str) -> Option<&str> {
        let package = namespace.split_once(';').map_or(namespace, |(pkg, _)| pkg);
        self.packages.get(package).map(String::as_str)
    }
}

/// Converts a PascalCase or camelCase name to snake_case, the way tonic
/// names generated trait methods and server modules.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_from_last_segment() {
        let mut table = AliasTable::default();
        assert_eq!(table.alias_for("grpcmock/generated/foo"), "foo");
    }

    #[test]
    fn dashes_become_underscores() {
        let mut table = AliasTable::default();
        assert_eq!(table.alias_for("grpcmock/generated/multi-package"), "multi_package");
    }

    #[test]
    fn explicit_alias_form() {
        let mut table = AliasTable::default();
        assert_eq!(table.alias_for("grpcmock/generated/foo;custom"), "custom");
        // Same package resolves to the explicit alias from then on.
        assert_eq!(table.alias_for("grpcmock/generated/foo"), "custom");
    }

    #[test]
    fn same_namespace_same_alias() {
        let mut table = AliasTable::default();
        let a = table.alias_for("grpcmock/generated/bar");
        let b = table.alias_for("grpcmock/generated/bar");
        assert_eq!(a, b);
        assert_eq!(table.get("grpcmock/generated/bar"), Some(a.as_str()));
    }

    #[test]
    fn keyword_gets_pb_suffix() {
        let mut table = AliasTable::default();
        assert_eq!(table.alias_for("grpcmock/generated/type"), "type_pb");
    }

    #[test]
    fn duplicate_alias_gets_numeric_suffix() {
        let mut table = AliasTable::default();
        assert_eq!(table.alias_for("grpcmock/generated/a/foo"), "foo");
        assert_eq!(table.alias_for("grpcmock/generated/b/foo"), "foo1");
        assert_eq!(table.alias_for("grpcmock/generated/c/foo"), "foo2");
    }

    #[test]
    fn assignment_is_deterministic_in_order() {
        let namespaces = [
            "grpcmock/generated/x/pkg",
            "grpcmock/generated/y/pkg",
            "grpcmock/generated/mod",
        ];
        let run = || {
            let mut table = AliasTable::default();
            namespaces.iter().map(|ns| table.alias_for(ns)).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
        assert_eq!(run(), vec!["pkg", "pkg1", "mod_pb"]);
    }

    #[test]
    fn snake_case() {
        assert_eq!(to_snake_case("SayHello"), "say_hello");
        assert_eq!(to_snake_case("Greeter"), "greeter");
        assert_eq!(to_snake_case("getHTTPResponse"), "get_httpresponse");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }
}
