//! SQL validator: three sequential filters (length, command policy,
//! injection scan) plus a structural check and a best-effort parameter
//! scan, applied before a query reaches the executor.

use bridge_config::ValidatorConfig;
use bridge_proto::{BridgeError, CellValue, RiskLevel, ValidationCause};
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandCategory {
    Dql,
    Dml,
    Ddl,
    StoredProc,
    Unknown,
}

fn classify_verb(verb: &str) -> CommandCategory {
    match verb {
        "SELECT" | "SHOW" | "DESCRIBE" | "EXPLAIN" => CommandCategory::Dql,
        "INSERT" | "UPDATE" | "DELETE" => CommandCategory::Dml,
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" => CommandCategory::Ddl,
        "CALL" | "EXEC" | "EXECUTE" => CommandCategory::StoredProc,
        _ => CommandCategory::Unknown,
    }
}

/// Extracts the leading SQL verb: skips leading whitespace and `--`/`/* */`
/// comments, then uppercases the first word.
fn leading_verb(query: &str) -> String {
    let mut rest = query.trim_start();
    loop {
        if let Some(stripped) = rest.strip_prefix("--") {
            rest = stripped.splitn(2, '\n').nth(1).unwrap_or("").trim_start();
            continue;
        }
        if let Some(stripped) = rest.strip_prefix("/*") {
            if let Some(end) = stripped.find("*/") {
                rest = stripped[end + 2..].trim_start();
                continue;
            }
        }
        break;
    }
    rest.split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_uppercase()
}

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let sources = [
        r"(?i)\bunion\b\s+(all\s+)?\bselect\b",
        r"(?m)--[^\n]*$",
        r"(?i)\b(sleep|benchmark|pg_sleep|waitfor\s+delay)\s*\(",
        r";\s*\w+",
        r"(?i)\b(load_file|into\s+outfile|into\s+dumpfile)\b",
        r"(?i)\b(exec|execute|sp_executesql)\b",
        r"(?i)\binformation_schema\b",
        r"(?i)\b0x[0-9a-f]+\b",
        r"(?i)\bchar\s*\(\s*\d+",
        r"(?i)\bcase\s+when\b.*\bthen\b",
        r"(?i)\bif\s*\(",
    ];
    sources.iter().map(|s| Regex::new(s).expect("static pattern")).collect()
});

/// The `regex` crate has no backreference support, so boolean tautologies
/// like `OR 1=1` or `AND 'a'='a'` are matched by capturing both sides of an
/// `=` and comparing them in Rust rather than in the pattern itself.
static TAUTOLOGY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\w+)\s*=\s*(\w+)\b").expect("static pattern"));

fn contains_tautology(query: &str) -> bool {
    TAUTOLOGY_PATTERN
        .captures_iter(query)
        .any(|caps| caps[1].eq_ignore_ascii_case(&caps[2]))
}

/// Running counters for the validator, updated by every `validate` call.
#[derive(Debug, Default)]
pub struct ValidatorStats {
    pub total: AtomicU64,
    pub valid: AtomicU64,
    pub blocked: AtomicU64,
    pub injection_attempts: AtomicU64,
    pub command_violations: AtomicU64,
    pub structure_violations: AtomicU64,
}

pub struct ValidationOutcome {
    pub risk: RiskLevel,
}

pub struct SqlValidator {
    config: ValidatorConfig,
    pub stats: ValidatorStats,
}

impl SqlValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            stats: ValidatorStats::default(),
        }
    }

    pub fn validate(&self, query: &str, params: &[CellValue]) -> Result<ValidationOutcome, BridgeError> {
        self.stats.total.fetch_add(1, Ordering::Relaxed);

        if !self.config.enabled {
            self.stats.valid.fetch_add(1, Ordering::Relaxed);
            return Ok(ValidationOutcome { risk: RiskLevel::Low });
        }

        if let Err(e) = self.check_length(query) {
            self.stats.blocked.fetch_add(1, Ordering::Relaxed);
            self.log_violation(query, &e);
            return Err(e);
        }

        if let Err(e) = self.check_command_policy(query) {
            self.stats.blocked.fetch_add(1, Ordering::Relaxed);
            self.stats.command_violations.fetch_add(1, Ordering::Relaxed);
            self.log_violation(query, &e);
            return Err(e);
        }

        if let Err(e) = self.check_injection(query) {
            self.stats.blocked.fetch_add(1, Ordering::Relaxed);
            self.stats.injection_attempts.fetch_add(1, Ordering::Relaxed);
            self.log_violation(query, &e);
            return Err(e);
        }

        if let Err(e) = self.check_structure(query) {
            self.stats.structure_violations.fetch_add(1, Ordering::Relaxed);
            if self.config.strict_mode {
                self.stats.blocked.fetch_add(1, Ordering::Relaxed);
                self.log_violation(query, &e);
                return Err(e);
            }
        }

        self.scan_parameters(params);

        self.stats.valid.fetch_add(1, Ordering::Relaxed);
        Ok(ValidationOutcome { risk: RiskLevel::Low })
    }

    fn check_length(&self, query: &str) -> Result<(), BridgeError> {
        if query.len() > self.config.max_query_length {
            return Err(BridgeError::validation(
                ValidationCause::OversizedQuery,
                format!(
                    "query length {} exceeds max {}",
                    query.len(),
                    self.config.max_query_length
                ),
            ));
        }
        Ok(())
    }

    fn check_command_policy(&self, query: &str) -> Result<(), BridgeError> {
        let verb = leading_verb(query);

        if self.config.blocked_commands.iter().any(|c| c.eq_ignore_ascii_case(&verb)) {
            return Err(BridgeError::validation(
                ValidationCause::CommandPolicy,
                format!("command {verb} is explicitly blocked"),
            ));
        }

        if !self.config.allowed_commands.is_empty() {
            if self.config.allowed_commands.iter().any(|c| c.eq_ignore_ascii_case(&verb)) {
                return Ok(());
            }
            return Err(BridgeError::validation(
                ValidationCause::CommandPolicy,
                format!("command {verb} is not in the allowed list"),
            ));
        }

        match classify_verb(&verb) {
            CommandCategory::Dql => Ok(()),
            CommandCategory::Dml if self.config.allow_dml => Ok(()),
            CommandCategory::Dml => Err(BridgeError::validation(
                ValidationCause::CommandPolicy,
                "DML statements are disabled",
            )),
            CommandCategory::Ddl if self.config.allow_ddl => Ok(()),
            CommandCategory::Ddl => Err(BridgeError::validation(
                ValidationCause::CommandPolicy,
                "DDL statements are disabled",
            )),
            CommandCategory::StoredProc if self.config.allow_stored_procs => Ok(()),
            CommandCategory::StoredProc => Err(BridgeError::validation(
                ValidationCause::CommandPolicy,
                "stored procedure calls are disabled",
            )),
            CommandCategory::Unknown if !self.config.strict_mode => Ok(()),
            CommandCategory::Unknown => Err(BridgeError::validation(
                ValidationCause::CommandPolicy,
                format!("unknown command {verb} rejected under strict mode"),
            )),
        }
    }

    fn check_injection(&self, query: &str) -> Result<(), BridgeError> {
        if contains_tautology(query) {
            return Err(BridgeError::validation(
                ValidationCause::InjectionSuspected,
                "Potential SQL injection detected",
            ));
        }
        for pattern in INJECTION_PATTERNS.iter() {
            if pattern.is_match(query) {
                return Err(BridgeError::validation(
                    ValidationCause::InjectionSuspected,
                    "Potential SQL injection detected",
                ));
            }
        }
        Ok(())
    }

    fn check_structure(&self, query: &str) -> Result<(), BridgeError> {
        let mut depth: i64 = 0;
        let mut single_quotes = 0u32;
        let mut double_quotes = 0u32;
        let mut semicolons = 0u32;
        let mut chars = query.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    chars.next();
                }
                '(' => depth += 1,
                ')' => depth -= 1,
                '\'' => single_quotes += 1,
                '"' => double_quotes += 1,
                ';' => semicolons += 1,
                _ => {}
            }
        }

        if depth != 0 || single_quotes % 2 != 0 || double_quotes % 2 != 0 {
            return Err(BridgeError::validation(
                ValidationCause::StructureViolation,
                "unbalanced parentheses or quotes",
            ));
        }

        if self.config.strict_mode {
            if query.contains("/*") && !query.contains("*/") {
                return Err(BridgeError::validation(
                    ValidationCause::StructureViolation,
                    "unclosed block comment",
                ));
            }
            if semicolons > 1 {
                return Err(BridgeError::validation(
                    ValidationCause::StructureViolation,
                    "multiple statements in one query",
                ));
            }
        }

        Ok(())
    }

    /// Best-effort: scans string parameters for the same patterns used on
    /// the query text. Findings are logged, never blocking.
    fn scan_parameters(&self, params: &[CellValue]) {
        if !self.config.log_violations {
            return;
        }
        for param in params {
            if let CellValue::String(text) = param {
                if INJECTION_PATTERNS.iter().any(|p| p.is_match(text)) {
                    tracing::warn!(param = %truncate(text, 64), "parameter resembles an injection pattern");
                }
            }
        }
    }

    fn log_violation(&self, query: &str, err: &BridgeError) {
        if self.config.log_violations {
            tracing::warn!(query = %truncate(query, 120), error = %err, "query rejected by validator");
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SqlValidator {
        SqlValidator::new(ValidatorConfig::default())
    }

    #[test]
    fn allows_plain_select() {
        let v = validator();
        assert!(v.validate("SELECT id, name FROM users", &[]).is_ok());
    }

    #[test]
    fn blocks_ddl_by_default() {
        let v = validator();
        let err = v.validate("DROP TABLE users", &[]).unwrap_err();
        assert!(matches!(err, BridgeError::ValidationRejected { cause: ValidationCause::CommandPolicy, .. }));
    }

    #[test]
    fn detects_tautology_injection() {
        let v = validator();
        let err = v
            .validate("SELECT * FROM users WHERE id=1 OR 1=1", &[])
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ValidationRejected { cause: ValidationCause::InjectionSuspected, .. }
        ));
        assert!(err.to_string().contains("injection"));
    }

    #[test]
    fn detects_union_select_injection() {
        let v = validator();
        assert!(v
            .validate("SELECT id FROM users UNION SELECT password FROM admins", &[])
            .is_err());
    }

    #[test]
    fn oversized_query_rejected() {
        let mut cfg = ValidatorConfig::default();
        cfg.max_query_length = 10;
        let v = SqlValidator::new(cfg);
        let err = v.validate("SELECT * FROM a_very_long_table_name", &[]).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ValidationRejected { cause: ValidationCause::OversizedQuery, .. }
        ));
    }

    #[test]
    fn unbalanced_parens_rejected_in_strict_mode() {
        let mut cfg = ValidatorConfig::default();
        cfg.strict_mode = true;
        let v = SqlValidator::new(cfg);
        assert!(v.validate("SELECT * FROM users WHERE (id = 1", &[]).is_err());
    }

    #[test]
    fn unbalanced_parens_only_warns_outside_strict_mode() {
        let v = validator();
        assert!(v.validate("SELECT * FROM users WHERE (id = 1", &[]).is_ok());
    }

    #[test]
    fn stats_increment_on_validate() {
        let v = validator();
        let _ = v.validate("SELECT 1", &[]);
        assert_eq!(v.stats.total.load(Ordering::Relaxed), 1);
        assert_eq!(v.stats.valid.load(Ordering::Relaxed), 1);
    }
}
