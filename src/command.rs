use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

const SWITCH_PREFIX: char = '-';
const VALUE_SEPARATOR: char = ':';

/// A parsed command line: `-name` / `-name:value` switches plus positional files.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandModel {
    tokens: Vec<String>,
    switches: HashMap<String, Option<String>>,
    files: Vec<PathBuf>,
}

impl CommandModel {
    /// Parse an argument vector. When a switch appears more than once the last
    /// occurrence wins.
    pub fn parse<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        let mut switches = HashMap::new();
        let mut files = Vec::new();

        for token in &tokens {
            match split_switch(token) {
                Some((name, value)) => {
                    switches.insert(name.to_string(), value.map(str::to_string));
                }
                None => files.push(PathBuf::from(token)),
            }
        }

        Self {
            tokens,
            switches,
            files,
        }
    }

    /// Parse a single text line, splitting on whitespace and honouring double quotes.
    pub fn from_line(line: &str) -> Self {
        Self::parse(tokenize(line))
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.switches.contains_key(name)
    }

    /// Value of a switch; blank values read as absent.
    pub fn value_of(&self, name: &str) -> Option<&str> {
        self.switches
            .get(name)
            .and_then(|value| value.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn switch_names(&self) -> impl Iterator<Item = &str> {
        self.switches.keys().map(String::as_str)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl fmt::Display for CommandModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for token in &self.tokens {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            if token.is_empty() || token.contains(char::is_whitespace) {
                write!(f, "\"{token}\"")?;
            } else {
                f.write_str(token)?;
            }
        }
        Ok(())
    }
}

/// Split `-name[:value]` into its parts, or `None` for a positional token.
pub(crate) fn split_switch(token: &str) -> Option<(&str, Option<&str>)> {
    let body = token.strip_prefix(SWITCH_PREFIX)?;
    if body.is_empty() {
        return None;
    }
    Some(match body.split_once(VALUE_SEPARATOR) {
        Some((name, value)) => (name, Some(value)),
        None => (body, None),
    })
}

fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}
