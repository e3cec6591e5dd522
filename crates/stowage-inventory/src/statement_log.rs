use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Environment variable naming a file that receives every mutation
/// statement, one per line, for audit.
pub const SQL_STATEMENTS_LOG_ENV: &str = "SQL_STATEMENTS_LOG_FILE";

/// Best-effort append-only audit of mutation statements.
///
/// Disabled unless `SQL_STATEMENTS_LOG_FILE` is non-empty at store-open
/// time. Audit write failures never fail the mutation itself.
#[derive(Debug, Clone, Default)]
pub(crate) struct StatementLog {
    path: Option<PathBuf>,
}

impl StatementLog {
    pub(crate) fn from_env() -> Self {
        let path = env::var(SQL_STATEMENTS_LOG_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        Self { path }
    }

    pub(crate) fn record(&self, sql: &str, params: &[String]) {
        let Some(path) = &self.path else {
            return;
        };
        let rendered = render_statement(sql, params);
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{rendered}");
        }
    }
}

/// Substitute positional placeholders with quoted values so the audit line
/// is a readable statement rather than a template.
fn render_statement(sql: &str, params: &[String]) -> String {
    let mut rendered = String::with_capacity(sql.len() + params.len() * 8);
    let mut next = params.iter();
    for ch in sql.chars() {
        if ch == '?' {
            match next.next() {
                Some(value) => {
                    rendered.push('\'');
                    rendered.push_str(&value.replace('\'', "''"));
                    rendered.push('\'');
                }
                None => rendered.push('?'),
            }
        } else {
            rendered.push(ch);
        }
    }
    rendered
}
