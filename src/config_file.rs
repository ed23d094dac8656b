use anyhow::{anyhow, Context, Result};
use std::collections::{HashMap, HashSet};
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

const PROJECT_FILE: &str = ".streamtaskrc";
const MAX_ALIAS_DEPTH: usize = 10;

/// Configuration file handler for streamtask
#[derive(Debug, Default)]
pub struct ConfigFile {
    /// Arguments prepended to every command line
    pub defaults: Option<String>,
    /// Named argument bundles, expanded by `-a NAME`
    pub aliases: HashMap<String, String>,
}

impl ConfigFile {
    /// Find project-level .streamtaskrc by walking up from the working directory
    pub fn find_project_config() -> Option<PathBuf> {
        let mut current = env::current_dir().ok()?;
        loop {
            let config_path = current.join(PROJECT_FILE);
            if config_path.exists() {
                return Some(config_path);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// User config file locations in order of preference
    pub fn get_user_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if cfg!(windows) {
            if let Ok(appdata) = env::var("APPDATA") {
                paths.push(PathBuf::from(appdata).join("streamtask").join("config.ini"));
            }
            if let Ok(userprofile) = env::var("USERPROFILE") {
                paths.push(PathBuf::from(userprofile).join(PROJECT_FILE));
            }
        } else {
            let xdg_config = env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    env::var("HOME")
                        .map(|h| PathBuf::from(h).join(".config"))
                        .unwrap_or_else(|_| PathBuf::from(".config"))
                });
            paths.push(xdg_config.join("streamtask").join("config.ini"));

            if let Ok(home) = env::var("HOME") {
                paths.push(PathBuf::from(home).join(PROJECT_FILE));
            }
        }

        paths
    }

    /// Load with precedence: project file over the first existing user file
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::get_user_config_paths().into_iter().find(|p| p.exists()) {
            config = Self::merge_configs(config, Self::load_from_path(&path)?);
        }

        if let Some(project_path) = Self::find_project_config() {
            config = Self::merge_configs(config, Self::load_from_path(&project_path)?);
        }

        Ok(config)
    }

    /// Load `custom_path` alone when given, the usual search otherwise
    pub fn load_with_custom_path(custom_path: Option<&str>) -> Result<Self> {
        match custom_path {
            Some(path) => Self::load_from_path(Path::new(path)),
            None => Self::load(),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(Self::parse_ini_content(&content))
    }

    /// Parse INI content. Unknown keys and sections are ignored.
    fn parse_ini_content(content: &str) -> Self {
        let mut defaults = None;
        let mut aliases = HashMap::new();
        let mut section = String::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_string();
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match section.as_str() {
                "" if key == "defaults" => defaults = Some(value.to_string()),
                "aliases" => {
                    aliases.insert(key.to_string(), value.to_string());
                }
                _ => {}
            }
        }

        Self { defaults, aliases }
    }

    /// Merge two configurations, `overlay` winning on conflicts
    fn merge_configs(base: Self, overlay: Self) -> Self {
        let mut aliases = base.aliases;
        aliases.extend(overlay.aliases);
        Self {
            defaults: overlay.defaults.or(base.defaults),
            aliases,
        }
    }

    /// Describe where configuration comes from and what is active
    pub fn show_config(out: &mut impl Write) -> std::io::Result<()> {
        writeln!(
            out,
            "Configuration precedence: CLI > project {} > user config > defaults\n",
            PROJECT_FILE
        )?;

        let project_path = Self::find_project_config();
        let user_paths = Self::get_user_config_paths();

        match Self::load() {
            Ok(config) => {
                if project_path.is_none() && !user_paths.iter().any(|p| p.exists()) {
                    writeln!(out, "No configuration files found. Using defaults.")?;
                }
                if let Some(defaults) = &config.defaults {
                    writeln!(out, "Active defaults:\n  defaults = {}", defaults)?;
                }
                if !config.aliases.is_empty() {
                    writeln!(out, "Active aliases:")?;
                    let mut sorted: Vec<_> = config.aliases.iter().collect();
                    sorted.sort_by_key(|(name, _)| name.as_str());
                    for (name, value) in sorted {
                        writeln!(out, "  {} = {}", name, value)?;
                    }
                }
            }
            Err(e) => writeln!(out, "Error loading configuration: {:#}", e)?,
        }

        writeln!(out, "\nConfiguration search locations (in precedence order):")?;
        match &project_path {
            Some(path) => writeln!(out, "  1. Project: {} (found)", path.display())?,
            None => writeln!(
                out,
                "  1. Project: {} (searched up directory tree, not found)",
                PROJECT_FILE
            )?,
        }
        for (i, path) in user_paths.iter().enumerate() {
            let status = if path.exists() { "found" } else { "not found" };
            writeln!(out, "  {}. User: {} ({})", i + 2, path.display(), status)?;
        }

        Ok(())
    }

    /// Expand one alias, following nested `-a NAME` references
    pub fn resolve_alias(
        &self,
        name: &str,
        seen: &mut HashSet<String>,
        depth: usize,
    ) -> Result<Vec<String>> {
        if depth > MAX_ALIAS_DEPTH {
            return Err(anyhow!("Alias chain too deep: {} levels", depth));
        }
        if !seen.insert(name.to_string()) {
            return Err(anyhow!("Circular dependency detected in alias: {}", name));
        }

        let value = self
            .aliases
            .get(name)
            .ok_or_else(|| anyhow!("Unknown alias: {}", name))?;
        let args = shell_words::split(value)
            .with_context(|| format!("Invalid alias '{}': failed to parse arguments", name))?;

        let mut result = Vec::new();
        let mut iter = args.into_iter().peekable();
        while let Some(arg) = iter.next() {
            if is_alias_flag(&arg) && iter.peek().is_some() {
                if let Some(nested) = iter.next() {
                    result.extend(self.resolve_alias(&nested, seen, depth + 1)?);
                }
            } else {
                result.push(arg);
            }
        }

        seen.remove(name);
        Ok(result)
    }

    /// Prepend defaults (after the program name), then expand aliases
    pub fn process_args(&self, args: Vec<String>) -> Result<Vec<String>> {
        let args = match &self.defaults {
            Some(defaults) => {
                let default_args = shell_words::split(defaults)
                    .context("Invalid defaults: failed to parse arguments")?;
                let mut args = args.into_iter();
                let mut with_defaults: Vec<String> = args.next().into_iter().collect();
                with_defaults.extend(default_args);
                with_defaults.extend(args);
                with_defaults
            }
            None => args,
        };

        let mut result = Vec::with_capacity(args.len());
        let mut iter = args.into_iter().peekable();
        while let Some(arg) = iter.next() {
            if is_alias_flag(&arg) && iter.peek().is_some() {
                if let Some(name) = iter.next() {
                    result.extend(self.resolve_alias(&name, &mut HashSet::new(), 0)?);
                }
            } else {
                result.push(arg);
            }
        }

        Ok(result)
    }
}

fn is_alias_flag(arg: &str) -> bool {
    arg == "-a" || arg == "--alias"
}
