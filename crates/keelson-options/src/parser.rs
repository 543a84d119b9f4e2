use crate::registry::OptionRegistry;
use crate::value::OptionValue;
use crate::OptionsError;
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, Command};

/// Scan the raw arguments for a help request before real parsing happens, so
/// `--help` keeps working even when the option schema is inconsistent.
///
/// Returns the requested section: `--help` and `--help=all` both mean every
/// section (`*`).
pub fn help_section(args: &[String]) -> Option<String> {
    for arg in args {
        if arg == "--help" {
            return Some("*".to_owned());
        }
        if let Some(section) = arg.strip_prefix("--help=") {
            let section = if section == "all" { "*" } else { section };
            return Some(section.to_owned());
        }
    }
    None
}

/// Parse command-line arguments against the registered schema, assigning
/// values back into the registry. `args` must not include the binary name.
pub fn parse_args(registry: &mut OptionRegistry, args: &[String]) -> Result<(), OptionsError> {
    let mut cmd = Command::new("keelson")
        .no_binary_name(true)
        .disable_help_flag(true)
        .disable_version_flag(true);

    for spec in registry.iter() {
        let mut arg = Arg::new(spec.name.clone())
            .long(spec.name.clone())
            .help(spec.description.clone())
            .hide(spec.hidden)
            .value_name(spec.default.kind())
            .action(ArgAction::Append);
        if matches!(spec.default, OptionValue::Bool(_)) {
            // bare `--flag` means `--flag true`
            arg = arg.num_args(0..=1).default_missing_value("true");
        }
        cmd = cmd.arg(arg);
    }

    let matches = cmd
        .try_get_matches_from(args)
        .map_err(|e| OptionsError::Parse(e.to_string()))?;

    let names: Vec<String> = registry.iter().map(|s| s.name.clone()).collect();
    for name in names {
        if matches.value_source(&name) != Some(ValueSource::CommandLine) {
            continue;
        }
        if let Some(values) = matches.get_many::<String>(&name) {
            for value in values {
                registry.set_from_str(&name, value)?;
            }
        }
    }
    Ok(())
}
