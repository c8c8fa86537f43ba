//! Session affinity detector (`spec.md` §4.8): a structural pre-classifier
//! over the first ~200 characters of SQL that flags statements establishing
//! server-local state, requiring the rest of the session to stick to the
//! same backend connection.
//!
//! Built fresh per the literal pattern list in `spec.md` §4.8 — the teacher
//! has no SQL session-affinity classifier to ground this on — using the
//! `regex` crate already in its dependency table, in the idiom of its
//! `parser` module: simple, case-insensitive, anchored matchers over a
//! bounded SQL prefix.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

const PREFIX_LEN: usize = 200;

/// One pattern per `spec.md` §4.8 bullet. `(?i)` makes each case-insensitive;
/// `^\s*` anchors to (optional) leading whitespace only, never mid-statement.
static PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)^\s*create\s+(global\s+|local\s+)?temp(orary)?\s+table",
        r"(?i)^\s*create\s+table\s+#[^#]",
        r"(?i)^\s*declare\s+global\s+temporary\s+table",
        r"(?i)^\s*set\s+@",
        r"(?i)^\s*set\s+session\b",
        r"(?i)^\s*set\s+local\b",
        r"(?i)^\s*prepare\s+\S+\s+from\b",
    ])
    .expect("affinity pattern set is a fixed, valid literal")
});

/// `CREATE TABLE #name` affinity-flags, but `CREATE TABLE ##name` (a global
/// temp table in SQL Server's dialect, visible across sessions) must not —
/// checked separately since a single regex alternative can't easily express
/// "one `#` but not two" without a lookahead `regex` doesn't support.
static DOUBLE_HASH_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*create\s+table\s+##").expect("fixed literal pattern")
});

/// Returns whether `sql` must pin the session to its current backend
/// connection. Purely structural — never inspects comments, matching
/// `spec.md` §4.8's "does not parse comments."
pub fn requires_session_affinity(sql: &str) -> bool {
    let prefix: String = sql.chars().take(PREFIX_LEN).collect();
    if DOUBLE_HASH_TABLE.is_match(&prefix) {
        return false;
    }
    PATTERNS.is_match(&prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_temp_table_variants() {
        assert!(requires_session_affinity("CREATE TEMPORARY TABLE t (id int)"));
        assert!(requires_session_affinity("create global temp table t (id int)"));
        assert!(requires_session_affinity("  CREATE TABLE #scratch (id int)"));
        assert!(requires_session_affinity("DECLARE GLOBAL TEMPORARY TABLE t (id int)"));
    }

    #[test]
    fn does_not_flag_double_hash_global_temp_table() {
        assert!(!requires_session_affinity("CREATE TABLE ##scratch (id int)"));
    }

    #[test]
    fn flags_session_scoped_set_and_prepare() {
        assert!(requires_session_affinity("SET @x = 1"));
        assert!(requires_session_affinity("SET SESSION sort_buffer_size = 1000"));
        assert!(requires_session_affinity("set local statement_timeout = 5000"));
        assert!(requires_session_affinity("PREPARE stmt1 FROM 'select 1'"));
    }

    #[test]
    fn does_not_flag_plain_dml_ddl_or_bare_set() {
        assert!(!requires_session_affinity("SELECT * FROM accounts WHERE id = 1"));
        assert!(!requires_session_affinity("INSERT INTO t (a) VALUES (1)"));
        assert!(!requires_session_affinity("CREATE TABLE t (id int)"));
        assert!(!requires_session_affinity("SET x = y"));
    }
}
