// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Interactive resolver for the AMD loader.
//!
//! Each input line is treated as a module id and resolved against the
//! current configuration; dot commands change the configuration and the
//! referring module.

use crate::{load_resolver, print_resolution};
use owo_colors::OwoColorize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Config, Editor, Helper};
use spacey_loader::module_system::ModuleResolver;
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// REPL configuration constants
const HISTORY_FILE: &str = ".spacey_amd_history";
const MAX_HISTORY_SIZE: usize = 1000;

/// REPL commands that can be executed with a dot prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Exit,
    Clear,
    Version,
    Config,
    From,
    Url,
}

impl ReplCommand {
    /// Parse a REPL command from input string
    pub fn parse(input: &str) -> Option<(Self, Option<&str>)> {
        let input = input.trim();
        let rest = input.strip_prefix('.')?;

        let mut parts = rest.splitn(2, char::is_whitespace);
        let cmd = parts.next()?.to_lowercase();
        let arg = parts.next().map(str::trim).filter(|arg| !arg.is_empty());

        match cmd.as_str() {
            "help" | "h" | "?" => Some((ReplCommand::Help, arg)),
            "exit" | "quit" | "q" => Some((ReplCommand::Exit, arg)),
            "clear" | "cls" => Some((ReplCommand::Clear, arg)),
            "version" | "v" => Some((ReplCommand::Version, arg)),
            "config" | "c" => Some((ReplCommand::Config, arg)),
            "from" | "f" => Some((ReplCommand::From, arg)),
            "url" | "u" => Some((ReplCommand::Url, arg)),
            _ => None,
        }
    }

    /// Get all available commands for help/completion
    pub fn all_commands() -> &'static [(&'static str, &'static str)] {
        &[
            (".help", "Show this help message"),
            (".exit", "Exit the REPL"),
            (".clear", "Clear the screen"),
            (".version", "Show version information"),
            (".config <file>", "Apply a JSON loader configuration"),
            (".from [mid]", "Resolve relative to a module (no argument resets)"),
            (".url <path>", "Compute the location of a resource path"),
        ]
    }
}

/// Completes dot commands and package names
#[derive(Default)]
struct ResolverHelper {
    words: Vec<String>,
}

impl ResolverHelper {
    fn new() -> Self {
        let words = ReplCommand::all_commands()
            .iter()
            .filter_map(|(cmd, _)| cmd.split_whitespace().next())
            .map(String::from)
            .collect();
        Self { words }
    }

    fn add_words(&mut self, words: impl IntoIterator<Item = String>) {
        for word in words {
            if !self.words.contains(&word) {
                self.words.push(word);
            }
        }
    }
}

/// Start of the id or command under the cursor
fn word_start(line: &str) -> usize {
    line.rfind(char::is_whitespace).map(|i| i + 1).unwrap_or(0)
}

impl Completer for ResolverHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let start = word_start(&line[..pos]);
        let word = &line[start..pos];
        if word.is_empty() {
            return Ok((pos, vec![]));
        }

        let matches: Vec<Pair> = self
            .words
            .iter()
            .filter(|candidate| candidate.starts_with(word))
            .map(|candidate| Pair {
                display: candidate.clone(),
                replacement: candidate[word.len()..].to_string(),
            })
            .collect();

        Ok((pos, matches))
    }
}

impl Hinter for ResolverHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<Self::Hint> {
        if pos < line.len() {
            return None;
        }

        let word = &line[word_start(line)..];
        if word.len() < 2 {
            return None;
        }

        self.words
            .iter()
            .find(|candidate| candidate.starts_with(word) && candidate.len() > word.len())
            .map(|candidate| candidate[word.len()..].to_string().dimmed().to_string())
    }
}

impl Highlighter for ResolverHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if line.starts_with('.') {
            return Cow::Owned(line.magenta().to_string());
        }

        // Relative segments and plugin separators stand out
        let mut result = String::with_capacity(line.len() * 2);
        for (index, segment) in line.split('/').enumerate() {
            if index > 0 {
                result.push_str(&"/".dimmed().to_string());
            }
            let colored = match segment {
                "." | ".." => segment.yellow().to_string(),
                _ => match segment.split_once('!') {
                    Some((plugin, resource)) => {
                        format!("{}{}{}", plugin.cyan(), "!".red(), resource)
                    }
                    None => segment.to_string(),
                },
            };
            result.push_str(&colored);
        }

        Cow::Owned(result)
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

impl Validator for ResolverHelper {}

impl Helper for ResolverHelper {}

/// The interactive resolver
pub struct Repl {
    resolver: ModuleResolver,
    from: Option<String>,
    editor: Editor<ResolverHelper, DefaultHistory>,
    history_path: PathBuf,
}

impl Repl {
    /// Create a new REPL instance
    pub fn new(resolver: ModuleResolver) -> rustyline::Result<Self> {
        let config = Config::builder()
            .history_ignore_dups(true)?
            .history_ignore_space(true)
            .max_history_size(MAX_HISTORY_SIZE)?
            .auto_add_history(true)
            .build();

        let mut editor = Editor::with_config(config)?;
        let mut helper = ResolverHelper::new();
        helper.add_words(package_names(&resolver));
        editor.set_helper(Some(helper));

        let history_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spacey")
            .join(HISTORY_FILE);

        if let Some(parent) = history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        // Missing history is expected on first run
        let _ = editor.load_history(&history_path);

        Ok(Self {
            resolver,
            from: None,
            editor,
            history_path,
        })
    }

    /// Run the REPL main loop
    pub fn run(&mut self) -> rustyline::Result<()> {
        self.print_banner();

        loop {
            let prompt = self.format_prompt();

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();

                    if trimmed.is_empty() {
                        continue;
                    }

                    if let Some((cmd, arg)) = ReplCommand::parse(trimmed) {
                        match self.execute_command(cmd, arg) {
                            CommandResult::Continue => continue,
                            CommandResult::Exit => break,
                        }
                    }

                    if trimmed.starts_with('.') && !trimmed.starts_with("./") && !trimmed.starts_with("../") {
                        eprintln!(
                            "{}: unknown command '{}'",
                            "Error".red().bold(),
                            trimmed.cyan()
                        );
                        continue;
                    }

                    for id in trimmed.split_whitespace() {
                        print_resolution(&self.resolver, id, self.from.as_deref());
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C".dimmed());
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "^D".dimmed());
                    break;
                }
                Err(err) => {
                    eprintln!("{}: {:?}", "Error".red().bold(), err);
                    break;
                }
            }
        }

        let _ = self.editor.save_history(&self.history_path);

        println!();
        Ok(())
    }

    fn print_banner(&self) {
        println!();
        println!(
            "  {} {} {}",
            "Spacey AMD Loader".white().bold(),
            "v".dimmed(),
            spacey_loader::VERSION.bright_yellow()
        );
        println!(
            "  {} {}",
            "base url".dimmed(),
            self.resolver.base_url().green()
        );
        println!(
            "  {} {} {}",
            "Type".dimmed(),
            ".help".cyan(),
            "for available commands".dimmed()
        );
        println!();
    }

    fn format_prompt(&self) -> String {
        match &self.from {
            Some(from) => format!("{} ", format!("amd({})>", from).bright_green().bold()),
            None => format!("{} ", "amd>".bright_green().bold()),
        }
    }

    fn execute_command(&mut self, cmd: ReplCommand, arg: Option<&str>) -> CommandResult {
        match cmd {
            ReplCommand::Help => self.print_help(),
            ReplCommand::Exit => return CommandResult::Exit,
            ReplCommand::Clear => print!("\x1B[2J\x1B[H"),
            ReplCommand::Version => {
                println!();
                println!("{}: {}", "spacey-amd".bright_cyan().bold(), spacey_loader::VERSION.yellow());
                println!();
            }
            ReplCommand::Config => match arg {
                Some(path) => self.apply_config(Path::new(path)),
                None => missing_argument(".config", "requires a file path"),
            },
            ReplCommand::From => {
                self.from = arg.map(|mid| self.resolver.to_abs_mid(mid, None));
            }
            ReplCommand::Url => match arg {
                Some(path) => println!(
                    "{}",
                    self.resolver.to_url(path, self.from.as_deref()).green()
                ),
                None => missing_argument(".url", "requires a path"),
            },
        }
        CommandResult::Continue
    }

    fn apply_config(&mut self, path: &Path) {
        match load_resolver(Some(path)) {
            Ok(resolver) => {
                self.resolver = resolver;
                if let Some(helper) = self.editor.helper_mut() {
                    helper.add_words(package_names(&self.resolver));
                }
                println!(
                    "{} {}",
                    "configured from".dimmed(),
                    path.display().cyan()
                );
            }
            Err(err) => eprintln!("{}: {:#}", "Error".red().bold(), err),
        }
    }

    fn print_help(&self) {
        println!();
        println!("{}", "REPL Commands:".white().bold());
        println!();

        for (cmd, desc) in ReplCommand::all_commands() {
            println!("  {:16} {}", cmd.cyan(), desc.dimmed());
        }

        println!();
        println!(
            "  {}",
            "Any other input is resolved as one or more module ids.".dimmed()
        );
        println!();
    }
}

/// Result of executing a REPL command
enum CommandResult {
    Continue,
    Exit,
}

fn missing_argument(command: &str, message: &str) {
    eprintln!(
        "{}: {} {}",
        "Error".red().bold(),
        command.cyan(),
        message.dimmed()
    );
}

/// Package names known to `resolver`, for completion
fn package_names(resolver: &ModuleResolver) -> Vec<String> {
    let mut names: Vec<String> = resolver.package_names().map(String::from).collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repl_command_parse() {
        assert!(matches!(
            ReplCommand::parse(".help"),
            Some((ReplCommand::Help, None))
        ));
        assert!(matches!(
            ReplCommand::parse(".config loader.json"),
            Some((ReplCommand::Config, Some("loader.json")))
        ));
        assert!(matches!(
            ReplCommand::parse(".from  app/main "),
            Some((ReplCommand::From, Some("app/main")))
        ));
        assert!(matches!(
            ReplCommand::parse(".from"),
            Some((ReplCommand::From, None))
        ));
        assert!(ReplCommand::parse("./relative").is_none());
        assert!(ReplCommand::parse("app/main").is_none());
    }

    #[test]
    fn test_word_start() {
        assert_eq!(word_start("app/main"), 0);
        assert_eq!(word_start(".url ./a"), 5);
    }
}
