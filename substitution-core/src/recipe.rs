//! Execution recipe (`erc.yml`) handling
//!
//! The recipe is a YAML document whose `execution.cmd` string is a shell
//! command. Substitution rewrites that command so the container sees overlay
//! content at the base file's location through read-only bind mounts:
//!
//! ```text
//! docker run -it --rm --volume $(pwd)/BerlinOhne.csv:/erc/BerlinMit.csv:ro erc:xjiYy
//!                     └──────────────────── one clause per container path ──┘
//! ```
//!
//! A command that already is a container run is edited in place: a clause for
//! the same container path is overwritten, any other clause is left alone and
//! new clauses follow the last recognised option, ahead of any `--`, unknown
//! option or image reference. A plain in-container
//! command is wrapped into a run of the base compendium's image.

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::config::{MountConfig, SubstitutionConfig};
use crate::error::CoreError;
use crate::paths;

/// Long run options that take the following token as their value
const LONG_VALUE_FLAGS: &[&str] = &[
    "--add-host",
    "--annotation",
    "--attach",
    "--blkio-weight",
    "--blkio-weight-device",
    "--cap-add",
    "--cap-drop",
    "--cgroup-parent",
    "--cgroupns",
    "--cidfile",
    "--cpu-period",
    "--cpu-quota",
    "--cpu-rt-period",
    "--cpu-rt-runtime",
    "--cpu-shares",
    "--cpus",
    "--cpuset-cpus",
    "--cpuset-mems",
    "--detach-keys",
    "--device",
    "--device-cgroup-rule",
    "--device-read-bps",
    "--device-read-iops",
    "--device-write-bps",
    "--device-write-iops",
    "--dns",
    "--dns-option",
    "--dns-search",
    "--domainname",
    "--entrypoint",
    "--env",
    "--env-file",
    "--expose",
    "--gpus",
    "--group-add",
    "--health-cmd",
    "--health-interval",
    "--health-retries",
    "--health-start-period",
    "--health-timeout",
    "--hostname",
    "--ip",
    "--ip6",
    "--ipc",
    "--isolation",
    "--kernel-memory",
    "--label",
    "--label-file",
    "--link",
    "--link-local-ip",
    "--log-driver",
    "--log-opt",
    "--mac-address",
    "--memory",
    "--memory-reservation",
    "--memory-swap",
    "--memory-swappiness",
    "--mount",
    "--name",
    "--network",
    "--network-alias",
    "--oom-score-adj",
    "--pid",
    "--pids-limit",
    "--platform",
    "--publish",
    "--pull",
    "--restart",
    "--runtime",
    "--security-opt",
    "--shm-size",
    "--stop-signal",
    "--stop-timeout",
    "--storage-opt",
    "--sysctl",
    "--tmpfs",
    "--ulimit",
    "--user",
    "--userns",
    "--uts",
    "--volume",
    "--volume-driver",
    "--volumes-from",
    "--workdir",
];

/// Long run options that stand alone
const LONG_SWITCHES: &[&str] = &[
    "--detach",
    "--disable-content-trust",
    "--init",
    "--interactive",
    "--no-healthcheck",
    "--oom-kill-disable",
    "--privileged",
    "--publish-all",
    "--quiet",
    "--read-only",
    "--rm",
    "--sig-proxy",
    "--tty",
];

/// Single-letter options that take a value (`-v`, `-e`, ...)
const SHORT_VALUE_FLAGS: &str = "acehlmpuvw";

/// Single-letter options that stand alone and may be combined (`-it`)
const SHORT_SWITCHES: &str = "diPqt";

/// How many tokens a run option occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arity {
    /// The option token carries everything it needs
    Alone,
    /// The option consumes the next token as its value
    WithValue,
}

/// Arity of a known run option, `None` for anything unrecognised
fn option_arity(option: &str) -> Option<Arity> {
    if let Some(long) = option.strip_prefix("--") {
        if long.is_empty() {
            return None;
        }
        let (name, inline) = match option.split_once('=') {
            Some((name, _)) => (name, true),
            None => (option, false),
        };
        let takes_value = LONG_VALUE_FLAGS.contains(&name);
        if !takes_value && !LONG_SWITCHES.contains(&name) {
            return None;
        }
        return Some(if takes_value && !inline { Arity::WithValue } else { Arity::Alone });
    }

    let letters = option.strip_prefix('-')?;
    let mut chars = letters.chars().peekable();
    chars.peek()?;
    while let Some(c) = chars.next() {
        if SHORT_SWITCHES.contains(c) {
            continue;
        }
        if SHORT_VALUE_FLAGS.contains(c) {
            // `-v` alone waits for its value, `-v/x:/y` or `-v=/x:/y` carries it
            return Some(if chars.peek().is_none() { Arity::WithValue } else { Arity::Alone });
        }
        return None;
    }
    Some(Arity::Alone)
}

// ============================================================================
// Recipe document
// ============================================================================

/// Parsed `erc.yml`
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecipe {
    doc: Value,
}

impl ExecutionRecipe {
    /// Parse a recipe from YAML text
    pub fn from_yaml(text: &str) -> Result<Self, CoreError> {
        let doc: Value = serde_yaml::from_str(text)
            .map_err(|e| CoreError::MissingRecipe(format!("recipe is not valid YAML: {}", e)))?;
        Ok(Self { doc })
    }

    /// Serialize the recipe back to YAML
    pub fn to_yaml(&self) -> Result<String, CoreError> {
        serde_yaml::to_string(&self.doc)
            .map_err(|e| CoreError::MissingRecipe(format!("recipe cannot be serialized: {}", e)))
    }

    pub fn document(&self) -> &Value {
        &self.doc
    }

    /// The `execution.cmd` string, if present
    pub fn cmd(&self) -> Option<&str> {
        self.doc
            .get("execution")
            .and_then(|execution| execution.get("cmd"))
            .and_then(Value::as_str)
    }

    /// Replace `execution.cmd`, creating the `execution` block if needed
    pub fn set_cmd(&mut self, cmd: impl Into<String>) {
        let cmd: String = cmd.into();
        if !self.doc.is_mapping() {
            self.doc = Value::Mapping(Mapping::new());
        }
        if let Value::Mapping(root) = &mut self.doc {
            let key = Value::from("execution");
            if !root.get(&key).map_or(false, Value::is_mapping) {
                root.insert(key.clone(), Value::Mapping(Mapping::new()));
            }
            if let Some(Value::Mapping(execution)) = root.get_mut(&key) {
                execution.insert(Value::from("cmd"), Value::String(cmd));
            }
        }
    }

    /// Check that `execution.cmd` exists and is a usable command line
    pub fn validate(&self) -> Result<(), CoreError> {
        let cmd = self
            .cmd()
            .ok_or_else(|| CoreError::MissingRecipe("execution.cmd is missing".to_string()))?;
        let tokens = tokenize(cmd)?;
        if tokens.is_empty() {
            return Err(CoreError::MissingRecipe("execution.cmd is empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Command line tokens
// ============================================================================

/// One shell word: its spelling in the source and its unquoted value
#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    raw: String,
    value: String,
}

impl Token {
    fn plain(text: &str) -> Self {
        Self {
            raw: text.to_string(),
            value: text.to_string(),
        }
    }
}

/// Split a command line into shell words, honouring quotes and escapes
fn tokenize(cmd: &str) -> Result<Vec<Token>, CoreError> {
    let mut tokens = Vec::new();
    let mut chars = cmd.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut value = String::new();
        let mut end = start;
        while let Some(&(idx, c)) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            chars.next();
            end = idx + c.len_utf8();
            match c {
                '\'' => loop {
                    match chars.next() {
                        Some((i, '\'')) => {
                            end = i + 1;
                            break;
                        }
                        Some((_, ch)) => value.push(ch),
                        None => return Err(unbalanced("single quote")),
                    }
                },
                '"' => loop {
                    match chars.next() {
                        Some((i, '"')) => {
                            end = i + 1;
                            break;
                        }
                        Some((_, '\\')) => match chars.next() {
                            Some((_, esc @ ('"' | '\\' | '$' | '`'))) => value.push(esc),
                            Some((_, '\n')) => {}
                            Some((_, other)) => {
                                value.push('\\');
                                value.push(other);
                            }
                            None => return Err(unbalanced("double quote")),
                        },
                        Some((_, ch)) => value.push(ch),
                        None => return Err(unbalanced("double quote")),
                    }
                },
                '\\' => match chars.next() {
                    Some((i, ch)) => {
                        value.push(ch);
                        end = i + ch.len_utf8();
                    }
                    None => {
                        return Err(CoreError::MissingRecipe(
                            "execution.cmd ends with a dangling escape".to_string(),
                        ))
                    }
                },
                other => value.push(other),
            }
        }

        tokens.push(Token {
            raw: cmd[start..end].to_string(),
            value,
        });
    }

    Ok(tokens)
}

fn unbalanced(what: &str) -> CoreError {
    CoreError::MissingRecipe(format!("execution.cmd has an unterminated {}", what))
}

// ============================================================================
// Container run command
// ============================================================================

/// A run command split into program words, recognised option groups and the
/// remainder
#[derive(Debug, Clone)]
struct RunCommand {
    program: Vec<Token>,
    /// Each group is one option with its value, if it takes one
    options: Vec<Vec<Token>>,
    /// Everything after the recognised options: an unknown option, `--`, or
    /// the image reference followed by the container arguments
    rest: Vec<Token>,
}

impl RunCommand {
    /// Parse `tokens` as a run command introduced by `program`.
    ///
    /// Options are read up to the image, `--` or the first option whose arity
    /// is unknown, so the end of `options` always falls between two complete
    /// option groups. Returns `Ok(None)` when the tokens do not start with
    /// `program`.
    fn parse(tokens: Vec<Token>, program: &[Token]) -> Result<Option<Self>, CoreError> {
        let is_run = tokens.len() >= program.len()
            && tokens.iter().zip(program).all(|(t, p)| t.value == p.value);
        if !is_run {
            return Ok(None);
        }

        let mut rest = tokens.into_iter();
        let program: Vec<Token> = rest.by_ref().take(program.len()).collect();
        let rest: Vec<Token> = rest.collect();

        let mut options = Vec::new();
        let mut i = 0;
        while i < rest.len() {
            let value = rest[i].value.as_str();
            match option_arity(value) {
                Some(Arity::WithValue) => {
                    if i + 1 >= rest.len() {
                        return Err(CoreError::MissingRecipe(format!(
                            "option '{}' in execution.cmd has no value",
                            value
                        )));
                    }
                    options.push(vec![rest[i].clone(), rest[i + 1].clone()]);
                    i += 2;
                }
                Some(Arity::Alone) => {
                    options.push(vec![rest[i].clone()]);
                    i += 1;
                }
                None => {
                    if value.starts_with('-') && value != "-" && value != "--" {
                        debug!(option = %value, "Unrecognised run option, leaving the rest as is");
                    }
                    break;
                }
            }
        }

        let rest: Vec<Token> = rest[i..].to_vec();
        if rest.is_empty() {
            return Err(CoreError::MissingRecipe(
                "container run in execution.cmd has no image reference".to_string(),
            ));
        }

        Ok(Some(Self {
            program,
            options,
            rest,
        }))
    }

    fn render(&self) -> String {
        self.program
            .iter()
            .chain(self.options.iter().flatten())
            .chain(self.rest.iter())
            .map(|t| t.raw.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Container-side path of a mount option group, if the group is one
fn mount_target(group: &[Token]) -> Option<String> {
    let flag = group.first()?.value.as_str();
    let (name, inline) = match flag.strip_prefix("-v") {
        // `-v/x:/y` and `-v=/x:/y`
        Some(attached) if !attached.is_empty() && !flag.starts_with("--") => {
            ("-v", Some(attached.strip_prefix('=').unwrap_or(attached).to_string()))
        }
        _ => match flag.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (flag, None),
        },
    };
    let spec = inline.or_else(|| group.get(1).map(|t| t.value.clone()))?;

    match name {
        "-v" | "--volume" => {
            let mut parts = spec.split(':');
            let _host = parts.next()?;
            parts.next().map(str::to_string)
        }
        "--mount" => spec.split(',').find_map(|kv| {
            let (key, value) = kv.split_once('=')?;
            matches!(key.trim(), "target" | "dst" | "destination").then(|| value.trim().to_string())
        }),
        _ => None,
    }
}

fn same_container_path(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

// ============================================================================
// Mutator
// ============================================================================

/// One bind mount to encode: overlay content placed at `host_file` (a
/// top-level name in the composite payload) shadows `internal_path`
/// (payload-relative path of the base file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSubstitution {
    pub internal_path: String,
    pub host_file: String,
}

impl MountSubstitution {
    pub fn new(internal_path: impl Into<String>, host_file: impl Into<String>) -> Self {
        Self {
            internal_path: internal_path.into(),
            host_file: host_file.into(),
        }
    }
}

/// Rewrites `execution.cmd` to carry one read-only mount per substitution
#[derive(Debug, Clone)]
pub struct RecipeMutator {
    mount: MountConfig,
    run_command: String,
}

impl RecipeMutator {
    pub fn new(config: &SubstitutionConfig) -> Self {
        Self {
            mount: config.mount.clone(),
            run_command: config.run_command.clone(),
        }
    }

    /// Container path a substitution is mounted at
    pub fn container_path(&self, internal_path: &str) -> String {
        format!(
            "{}/{}",
            self.mount.container_workdir.trim_end_matches('/'),
            internal_path
        )
    }

    /// Return a copy of `recipe` whose command mounts every substitution.
    ///
    /// `image` is only used when the recipe holds a plain in-container
    /// command that has to be wrapped into a container run.
    pub fn mutate(
        &self,
        recipe: &ExecutionRecipe,
        image: &str,
        substitutions: &[MountSubstitution],
    ) -> Result<ExecutionRecipe, CoreError> {
        let cmd = recipe
            .cmd()
            .ok_or_else(|| CoreError::MissingRecipe("execution.cmd is missing".to_string()))?;
        let tokens = tokenize(cmd)?;
        if tokens.is_empty() {
            return Err(CoreError::MissingRecipe("execution.cmd is empty".to_string()));
        }

        let run_tokens = tokenize(&self.run_command)?;
        let program: Vec<Token> = run_tokens.iter().take(2).cloned().collect();

        let mut run = match RunCommand::parse(tokens, &program)? {
            Some(run) => run,
            None => {
                debug!(image = %image, "Wrapping in-container command into a container run");
                RunCommand {
                    program,
                    options: run_tokens.into_iter().skip(2).map(|t| vec![t]).collect(),
                    rest: vec![Token::plain(image)],
                }
            }
        };

        let mut added = Vec::new();
        let mut replaced = 0usize;
        for substitution in substitutions {
            let clause = self.clause(substitution)?;
            let target = self.container_path(&substitution.internal_path);

            let mut matches = run
                .options
                .iter()
                .enumerate()
                .filter(|(_, group)| {
                    mount_target(group).map_or(false, |t| same_container_path(&t, &target))
                })
                .map(|(idx, _)| idx)
                .collect::<Vec<_>>();

            match matches.first().copied() {
                Some(first) => {
                    run.options[first] = clause;
                    // Later clauses for the same path would shadow this one
                    for idx in matches.drain(1..).rev() {
                        run.options.remove(idx);
                    }
                    replaced += 1;
                }
                None => added.push(clause),
            }
        }

        let added_count = added.len();
        run.options.extend(added);
        debug!(added = added_count, replaced, "Mutated execution command");

        let mut mutated = recipe.clone();
        mutated.set_cmd(run.render());
        Ok(mutated)
    }

    /// Build the option group `--volume <host>/<file>:<workdir>/<path><mode>`
    fn clause(&self, substitution: &MountSubstitution) -> Result<Vec<Token>, CoreError> {
        let host_file = substitution.host_file.as_str();
        if host_file.is_empty() || host_file.contains('/') || host_file.contains(':') {
            return Err(CoreError::InvalidPath(format!(
                "'{}' cannot be used as a mounted file name",
                host_file
            )));
        }
        let internal = paths::normalize(&substitution.internal_path)?;
        if internal.contains(':') {
            return Err(CoreError::InvalidPath(format!(
                "'{}' cannot be used as a mount target",
                internal
            )));
        }

        let workdir = self.mount.container_workdir.trim_end_matches('/');
        let host_base = self.mount.host_base.trim_end_matches('/');
        let value = format!(
            "{}/{}:{}/{}{}",
            host_base, host_file, workdir, internal, self.mount.mode
        );

        let raw = if needs_quoting(host_file) || needs_quoting(&internal) {
            format!(
                "\"{}/{}:{}/{}{}\"",
                host_base,
                escape_double_quoted(host_file),
                workdir,
                escape_double_quoted(&internal),
                self.mount.mode
            )
        } else {
            value.clone()
        };

        Ok(vec![Token::plain(&self.mount.flag), Token { raw, value }])
    }
}

fn needs_quoting(s: &str) -> bool {
    s.chars().any(|c| {
        c.is_whitespace()
            || matches!(
                c,
                '"' | '\'' | '\\' | '$' | '`' | ';' | '&' | '|' | '<' | '>' | '(' | ')' | '*' | '?'
                    | '[' | ']' | '#' | '~' | '{' | '}' | '!'
            )
    })
}

fn escape_double_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
