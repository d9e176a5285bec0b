// cvar.rs - console variables: named, typed-on-read server settings

use crate::error::ConfigError;

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CvarFlags: u32 {
        /// Written out by `write_variables`.
        const ARCHIVE = 1;
        /// Only settable from the command line or `force_set`.
        const NOSET   = 8;
    }
}

/// A console variable.
#[derive(Clone, Debug)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub flags: CvarFlags,
    pub value: f32,
}

/// The full cvar registry.
#[derive(Default)]
pub struct CvarContext {
    pub cvar_vars: Vec<Cvar>,
    cvar_index: HashMap<String, usize>,
}

impl CvarContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.cvar_index.get(name).map(|&idx| &self.cvar_vars[idx])
    }

    /// Float value of a cvar. Returns 0 if not found.
    pub fn variable_value(&self, name: &str) -> f32 {
        self.find_var(name).map_or(0.0, |var| var.value)
    }

    /// String value of a cvar. Returns "" if not found.
    pub fn variable_string(&self, name: &str) -> &str {
        self.find_var(name).map_or("", |var| var.string.as_str())
    }

    /// Float value, or `default` when the cvar does not exist.
    pub fn value_or(&self, name: &str, default: f32) -> f32 {
        self.find_var(name).map_or(default, |var| var.value)
    }

    /// Get or create a cvar. If it already exists, the value is not changed
    /// but flags are OR'd in.
    pub fn get(&mut self, name: &str, value: &str, flags: CvarFlags) -> usize {
        if let Some(&idx) = self.cvar_index.get(name) {
            self.cvar_vars[idx].flags |= flags;
            return idx;
        }

        let idx = self.cvar_vars.len();
        self.cvar_vars.push(Cvar {
            name: name.to_string(),
            string: value.to_string(),
            flags,
            value: parse_value(value),
        });
        self.cvar_index.insert(name.to_string(), idx);
        idx
    }

    fn set2(&mut self, name: &str, value: &str, force: bool) -> Result<usize, ConfigError> {
        let idx = match self.cvar_index.get(name) {
            Some(&idx) => idx,
            None => return Ok(self.get(name, value, CvarFlags::empty())),
        };
        let var = &mut self.cvar_vars[idx];

        if !force && var.flags.contains(CvarFlags::NOSET) {
            return Err(ConfigError::WriteProtected(name.to_string()));
        }

        if value == var.string {
            return Ok(idx);
        }

        var.string = value.to_string();
        var.value = parse_value(value);
        Ok(idx)
    }

    /// Set a cvar value (respects NOSET).
    pub fn set(&mut self, name: &str, value: &str) -> Result<usize, ConfigError> {
        self.set2(name, value, false)
    }

    /// Force-set a cvar value (ignores NOSET).
    pub fn force_set(&mut self, name: &str, value: &str) -> usize {
        // force never hits the protection checks
        self.set2(name, value, true).unwrap_or_else(|_| self.get(name, value, CvarFlags::empty()))
    }

    /// Set a cvar from a float value.
    pub fn set_value(&mut self, name: &str, value: f32) -> Result<usize, ConfigError> {
        let val_str = if value == (value as i32) as f32 {
            format!("{}", value as i32)
        } else {
            format!("{}", value)
        };
        self.set(name, &val_str)
    }

    /// Executes config text: one `set <name> <value>` per line,
    /// `//` comments and blank lines ignored.
    pub fn exec_text(&mut self, text: &str) -> Result<usize, ConfigError> {
        let mut applied = 0;
        for (n, raw) in text.lines().enumerate() {
            let line = match raw.find("//") {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            let tokens = tokenize(line);
            match tokens.as_slice() {
                [cmd, name, value] if cmd == "set" => {
                    self.set(name, value)?;
                    applied += 1;
                }
                [cmd, ..] if cmd == "set" => {
                    return Err(ConfigError::BadLine {
                        line: n + 1,
                        reason: "usage: set <variable> <value>".to_string(),
                    });
                }
                [cmd, ..] => {
                    return Err(ConfigError::BadLine {
                        line: n + 1,
                        reason: format!("unknown command {:?}", cmd),
                    });
                }
                [] => {}
            }
        }
        debug!(applied, "config executed");
        Ok(applied)
    }

    /// Reads and executes a config file.
    pub fn exec_file(&mut self, path: &std::path::Path) -> Result<usize, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        self.exec_text(&text)
    }

    /// Write all archived cvars to a writer.
    pub fn write_variables(&self, writer: &mut dyn std::io::Write) -> std::io::Result<()> {
        for var in &self.cvar_vars {
            if var.flags.contains(CvarFlags::ARCHIVE) {
                writeln!(writer, "set {} \"{}\"", var.name, var.string)?;
            }
        }
        Ok(())
    }

    /// Applies `+set name value` pairs from a command line.
    /// Returns the arguments that were not consumed.
    pub fn apply_command_line(&mut self, args: &[String]) -> Vec<String> {
        let mut rest = Vec::new();
        let mut i = 0;
        while i < args.len() {
            if args[i] == "+set" && i + 2 < args.len() {
                // command line may set NOSET variables
                self.force_set(&args[i + 1], &args[i + 2]);
                i += 3;
                continue;
            }
            if args[i] == "+set" {
                warn!("+set needs a name and a value");
            }
            rest.push(args[i].clone());
            i += 1;
        }
        rest
    }
}

fn parse_value(s: &str) -> f32 {
    s.trim().parse::<f32>().unwrap_or(0.0)
}

/// Splits a line on whitespace, keeping "quoted strings" together.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut token = String::new();
        if c == '"' {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                token.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }
    tokens
}

// ============================================================
// Global registry
// ============================================================

static CVAR_CTX: Mutex<Option<CvarContext>> = parking_lot::const_mutex(None);

pub fn cvar_init() {
    let mut g = CVAR_CTX.lock();
    if g.is_none() {
        *g = Some(CvarContext::new());
    }
}

/// Access the global registry with a closure. Returns None if not initialized.
pub fn with_cvar_ctx<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut CvarContext) -> R,
{
    CVAR_CTX.lock().as_mut().map(f)
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cvar_get_registers_default() {
        let mut ctx = CvarContext::new();
        ctx.get("sv_view_range", "1800", CvarFlags::empty());
        assert_eq!(ctx.variable_value("sv_view_range"), 1800.0);
        assert_eq!(ctx.variable_string("sv_view_range"), "1800");
    }

    #[test]
    fn test_cvar_get_keeps_existing_value() {
        let mut ctx = CvarContext::new();
        ctx.get("sv_tickrate", "25", CvarFlags::empty());
        ctx.get("sv_tickrate", "60", CvarFlags::ARCHIVE);
        assert_eq!(ctx.variable_value("sv_tickrate"), 25.0);
        assert!(ctx.find_var("sv_tickrate").unwrap().flags.contains(CvarFlags::ARCHIVE));
    }

    #[test]
    fn test_cvar_noset_needs_force() {
        let mut ctx = CvarContext::new();
        ctx.get("sv_id_quarantine", "5", CvarFlags::NOSET);
        assert!(matches!(ctx.set("sv_id_quarantine", "9"), Err(ConfigError::WriteProtected(_))));
        assert_eq!(ctx.variable_value("sv_id_quarantine"), 5.0);
        ctx.force_set("sv_id_quarantine", "9");
        assert_eq!(ctx.variable_value("sv_id_quarantine"), 9.0);
    }

    #[test]
    fn test_cvar_set_value_formats_integers() {
        let mut ctx = CvarContext::new();
        ctx.set_value("sv_seed", 7.0).unwrap();
        assert_eq!(ctx.variable_string("sv_seed"), "7");
        ctx.set_value("sv_scale", 0.5).unwrap();
        assert_eq!(ctx.variable_string("sv_scale"), "0.5");
    }

    #[test]
    fn test_exec_text() {
        let mut ctx = CvarContext::new();
        let text = "// server config\nset sv_tickrate 30\n\nset hostname \"my arena\" // trailing\n";
        assert_eq!(ctx.exec_text(text).unwrap(), 2);
        assert_eq!(ctx.variable_value("sv_tickrate"), 30.0);
        assert_eq!(ctx.variable_string("hostname"), "my arena");
    }

    #[test]
    fn test_exec_text_rejects_unknown_command() {
        let mut ctx = CvarContext::new();
        let err = ctx.exec_text("set a 1\nbind x y\n").unwrap_err();
        assert!(matches!(err, ConfigError::BadLine { line: 2, .. }));
    }

    #[test]
    fn test_command_line() {
        let mut ctx = CvarContext::new();
        ctx.get("sv_seed", "0", CvarFlags::NOSET);
        let args: Vec<String> = ["+set", "sv_seed", "99", "extra"].iter().map(|s| s.to_string()).collect();
        let rest = ctx.apply_command_line(&args);
        assert_eq!(rest, vec!["extra".to_string()]);
        assert_eq!(ctx.variable_value("sv_seed"), 99.0);
    }

    #[test]
    fn test_write_variables_only_archived() {
        let mut ctx = CvarContext::new();
        ctx.get("a", "1", CvarFlags::ARCHIVE);
        ctx.get("b", "2", CvarFlags::empty());
        let mut out = Vec::new();
        ctx.write_variables(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "set a \"1\"\n");
    }

    #[test]
    fn test_global_registry_after_init() {
        cvar_init();
        let value = with_cvar_ctx(|ctx| {
            ctx.get("sv_bots_global", "3", CvarFlags::empty());
            ctx.variable_value("sv_bots_global")
        });
        assert_eq!(value, Some(3.0));
    }

    #[test]
    fn test_missing_cvar_reads_as_zero() {
        let ctx = CvarContext::new();
        assert_eq!(ctx.variable_value("sv_missing"), 0.0);
        assert_eq!(ctx.variable_string("sv_missing"), "");
        assert_eq!(ctx.value_or("sv_missing", 5.0), 5.0);
    }
}
