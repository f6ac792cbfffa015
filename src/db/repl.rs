//! Interactive REPL (Read-Eval-Print Loop) for revdb.

use std::io::{self, BufRead, Write};

use super::api::DbResult;
use super::connection::Connection;
use crate::sql::{QueryResult, ResultSet};

/// REPL configuration.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Show timing information.
    pub timing: bool,
    /// Max rows to display.
    pub max_rows: usize,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            timing: true,
            max_rows: 100,
        }
    }
}

/// The interactive REPL.
pub struct Repl {
    conn: Connection,
    config: ReplConfig,
    history: Vec<String>,
}

impl Repl {
    pub fn new(conn: Connection) -> Self {
        Self::with_config(conn, ReplConfig::default())
    }

    pub fn with_config(conn: Connection, config: ReplConfig) -> Self {
        Self {
            conn,
            config,
            history: Vec::new(),
        }
    }

    /// Run the REPL interactively.
    pub fn run(&mut self) -> DbResult<()> {
        self.print_banner();

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut input = String::new();
        let mut multiline = false;

        loop {
            let prompt = if multiline {
                "     -> ".to_string()
            } else {
                format!("{}> ", self.conn.label())
            };
            print!("{}", prompt);
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                println!("\nBye");
                break;
            }
            let line = line.trim_end();

            if line.is_empty() && !multiline {
                continue;
            }

            if multiline {
                input.push(' ');
            }
            input.push_str(line);

            // statements end with a semicolon, dot commands with the line
            if !input.ends_with(';') && !is_command(&input) {
                multiline = true;
                continue;
            }
            multiline = false;

            let cmd = input.trim().to_string();
            input.clear();
            if cmd.is_empty() {
                continue;
            }
            self.history.push(cmd.clone());

            if is_command(&cmd) {
                match self.handle_command(&cmd) {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => eprintln!("Error: {}", e),
                }
                continue;
            }

            let start = std::time::Instant::now();
            match self.conn.execute(&cmd) {
                Ok(result) => {
                    self.print_result(&result);
                    if self.config.timing {
                        println!("Time: {:.3}ms", start.elapsed().as_secs_f64() * 1000.0);
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        Ok(())
    }

    fn print_banner(&self) {
        println!("revdb {}", env!("CARGO_PKG_VERSION"));
        println!("Connected to {}. Type .help for commands.", self.conn.label());
        println!();
    }

    fn handle_command(&mut self, cmd: &str) -> DbResult<bool> {
        let cmd = cmd.trim_start_matches(['.', '\\']);
        let parts: Vec<&str> = cmd.split_whitespace().collect();
        let command = parts.first().map(|s| s.to_lowercase());

        match command.as_deref() {
            Some("help") | Some("h") | Some("?") => self.print_help(),
            Some("quit") | Some("exit") | Some("q") => return Ok(true),
            Some("tables") | Some("dt") => {
                let result = self.conn.execute("SHOW TABLES")?;
                self.print_result(&result);
            }
            Some("branches") => {
                let result = self.conn.execute("SHOW BRANCHES")?;
                self.print_result(&result);
            }
            Some("log") => {
                let limit = parts.get(1).and_then(|n| n.parse().ok()).unwrap_or(10);
                for info in self.conn.session_mut().history(Some(limit))? {
                    println!(
                        "{}  {}  {}",
                        info.id.short(),
                        info.commit.meta.timestamp.format("%Y-%m-%d %H:%M"),
                        info.commit.meta.summary()
                    );
                }
            }
            Some("history") => {
                for (i, cmd) in self.history.iter().enumerate() {
                    println!("  {}: {}", i + 1, cmd);
                }
            }
            Some("timing") => {
                self.config.timing = !self.config.timing;
                println!("Timing: {}", if self.config.timing { "on" } else { "off" });
            }
            Some(other) => {
                eprintln!("Unknown command: .{}", other);
                eprintln!("Type .help for available commands");
            }
            None => {}
        }

        Ok(false)
    }

    fn print_help(&self) {
        println!("Commands:");
        println!("  .help, .h, .?           Show this help message");
        println!("  .quit, .exit, .q        Exit the REPL");
        println!("  .tables, .dt            List tables of the current revision");
        println!("  .branches               List branches");
        println!("  .log [n]                Show the last n commits");
        println!("  .history                Show command history");
        println!("  .timing                 Toggle timing display");
        println!();
        println!("Statements:");
        println!("  USE db | USE db/rev");
        println!("  CALL REVDB_CHECKOUT('branch') | CALL REVDB_CHECKOUT('-b', 'new')");
        println!("  CALL REVDB_BRANCH('name'[, 'start']) | ('-d', 'name') | ('-m', 'old', 'new')");
        println!("  CALL REVDB_TAG('name'[, 'rev']) | ('-d', 'name')");
        println!("  CALL REVDB_COMMIT('-m', 'message')");
        println!("  SELECT ACTIVE_BRANCH() | SELECT * FROM table");
        println!("  SHOW BRANCHES | SHOW TAGS | SHOW TABLES | SHOW DATABASES");
        println!("  SET @@db_default_branch = 'branch'");
        println!();
    }

    fn print_result(&self, result: &QueryResult) {
        match result {
            QueryResult::Success { message } => println!("{}", message),
            QueryResult::Select(rs) => println!("{}", render_result_set(rs, self.config.max_rows)),
        }
    }
}

fn is_command(input: &str) -> bool {
    input.starts_with('.') || input.starts_with('\\')
}

/// Render a result set as an aligned text table.
pub fn render_result_set(rs: &ResultSet, max_rows: usize) -> String {
    if rs.is_empty() {
        return "(0 rows)".to_string();
    }

    let mut widths: Vec<usize> = rs.columns.iter().map(|c| c.len()).collect();
    for row in &rs.rows {
        for (i, col) in rs.columns.iter().enumerate() {
            if let Some(val) = row.get(col) {
                widths[i] = widths[i].max(format_value(val).len());
            }
        }
    }

    let mut out = Vec::new();
    let header: Vec<String> = rs
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:width$}", c, width = widths[i]))
        .collect();
    out.push(header.join(" | "));
    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push(sep.join("-+-"));

    let limit = rs.len().min(max_rows);
    for row in rs.rows.iter().take(limit) {
        let values: Vec<String> = rs
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let val = row.get(col).map(format_value).unwrap_or_default();
                format!("{:width$}", val, width = widths[i])
            })
            .collect();
        out.push(values.join(" | "));
    }

    if rs.len() > limit {
        out.push(format!("... ({} more rows)", rs.len() - limit));
    }
    out.push(format!("({} rows)", rs.len()));
    out.join("\n")
}

fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&serde_json::Value::Null), "NULL");
        assert_eq!(format_value(&json!(true)), "true");
        assert_eq!(format_value(&json!(42)), "42");
        assert_eq!(format_value(&json!("hello")), "hello");
    }

    #[test]
    fn test_render_result_set() {
        let mut rs = ResultSet::new(vec!["name".into(), "hash".into()]);
        rs.push(BTreeMap::from([
            ("name".to_string(), json!("main")),
            ("hash".to_string(), json!("abc")),
        ]));
        let text = render_result_set(&rs, 10);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "name | hash");
        assert_eq!(lines[2], "main | abc ");
        assert_eq!(lines[3], "(1 rows)");

        assert_eq!(render_result_set(&ResultSet::new(vec!["x".into()]), 10), "(0 rows)");
    }
}
