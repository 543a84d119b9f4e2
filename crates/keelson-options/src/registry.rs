use crate::value::OptionValue;
use crate::OptionsError;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

/// A named group of options. The section with the empty name is the global
/// one; its options are addressed by their bare name (`--dump-dependencies`
/// rather than `--section.option`).
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub title: String,
    pub hidden: bool,
}

impl Section {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            hidden: false,
        }
    }

    pub fn hidden(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            hidden: true,
            ..Self::new(name, title)
        }
    }
}

/// One registered option: schema plus its current value.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: String,
    pub section: String,
    pub description: String,
    pub hidden: bool,
    pub default: OptionValue,
    value: OptionValue,
    set: bool,
}

impl OptionSpec {
    pub fn value(&self) -> &OptionValue {
        &self.value
    }

    pub fn was_set(&self) -> bool {
        self.set
    }
}

/// Accumulates option schemas from features, parses values into them, and is
/// then sealed into a read-only configuration snapshot.
#[derive(Debug, Default)]
pub struct OptionRegistry {
    sections: Vec<Section>,
    options: BTreeMap<String, OptionSpec>,
    sealed: bool,
}

impl OptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a section. Sections are shared: if one of the same name
    /// already exists the first registration wins and this call is a no-op.
    pub fn add_section(&mut self, section: Section) -> Result<(), OptionsError> {
        if self.sealed {
            return Err(OptionsError::Sealed("add a section"));
        }
        if !self.has_section(&section.name) {
            self.sections.push(section);
        }
        Ok(())
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.name == name)
    }

    pub fn add_option(
        &mut self,
        name: &str,
        description: &str,
        default: OptionValue,
    ) -> Result<(), OptionsError> {
        self.insert(name, description, default, false)
    }

    /// Like `add_option` but excluded from help output and from
    /// `to_structured` exports.
    pub fn add_hidden_option(
        &mut self,
        name: &str,
        description: &str,
        default: OptionValue,
    ) -> Result<(), OptionsError> {
        self.insert(name, description, default, true)
    }

    fn insert(
        &mut self,
        name: &str,
        description: &str,
        default: OptionValue,
        hidden: bool,
    ) -> Result<(), OptionsError> {
        if self.sealed {
            return Err(OptionsError::Sealed("add an option"));
        }
        let section = match name.split_once('.') {
            Some((section, _)) => section.to_owned(),
            None => String::new(),
        };
        if !self.has_section(&section) {
            return Err(OptionsError::UnknownSection {
                section,
                option: name.to_owned(),
            });
        }
        if self.options.contains_key(name) {
            return Err(OptionsError::DuplicateOption(name.to_owned()));
        }
        self.options.insert(
            name.to_owned(),
            OptionSpec {
                name: name.to_owned(),
                section,
                description: description.to_owned(),
                hidden,
                value: default.clone(),
                default,
                set: false,
            },
        );
        Ok(())
    }

    /// Freeze the schema and all values. Sealing twice is an error.
    pub fn seal(&mut self) -> Result<(), OptionsError> {
        if self.sealed {
            return Err(OptionsError::Sealed("seal again"));
        }
        self.sealed = true;
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Assign a raw command-line value to a registered option.
    pub fn set_from_str(&mut self, name: &str, raw: &str) -> Result<(), OptionsError> {
        if self.sealed {
            return Err(OptionsError::Sealed("assign a value"));
        }
        let spec = self
            .options
            .get_mut(name)
            .ok_or_else(|| OptionsError::UnknownOption(name.to_owned()))?;
        spec.value.assign(raw, name)?;
        spec.set = true;
        Ok(())
    }

    pub fn was_set(&self, name: &str) -> bool {
        self.options.get(name).is_some_and(OptionSpec::was_set)
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, OptionsError> {
        match self.get(name)? {
            OptionValue::Bool(b) => Ok(*b),
            other => Err(self.mismatch(name, "bool", other)),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i64, OptionsError> {
        match self.get(name)? {
            OptionValue::Int(i) => Ok(*i),
            other => Err(self.mismatch(name, "int", other)),
        }
    }

    pub fn get_double(&self, name: &str) -> Result<f64, OptionsError> {
        match self.get(name)? {
            OptionValue::Double(d) => Ok(*d),
            other => Err(self.mismatch(name, "double", other)),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<String, OptionsError> {
        match self.get(name)? {
            OptionValue::String(s) => Ok(s.clone()),
            other => Err(self.mismatch(name, "string", other)),
        }
    }

    pub fn get_string_list(&self, name: &str) -> Result<Vec<String>, OptionsError> {
        match self.get(name)? {
            OptionValue::StringList(l) => Ok(l.clone()),
            other => Err(self.mismatch(name, "string list", other)),
        }
    }

    fn get(&self, name: &str) -> Result<&OptionValue, OptionsError> {
        self.options
            .get(name)
            .map(OptionSpec::value)
            .ok_or_else(|| OptionsError::UnknownOption(name.to_owned()))
    }

    fn mismatch(&self, name: &str, expected: &'static str, actual: &OptionValue) -> OptionsError {
        OptionsError::TypeMismatch {
            option: name.to_owned(),
            expected,
            actual: actual.kind(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptionSpec> {
        self.options.values()
    }

    /// Export the configuration as a nested JSON document: one object per
    /// section, global options at the top level. Hidden options and every
    /// path in `excludes` are omitted.
    pub fn to_structured(&self, excludes: &HashSet<String>) -> JsonValue {
        let mut root = JsonMap::new();
        for spec in self.options.values() {
            if spec.hidden || excludes.contains(&spec.name) {
                continue;
            }
            let short = spec
                .name
                .split_once('.')
                .map_or(spec.name.as_str(), |(_, rest)| rest);
            if spec.section.is_empty() {
                root.insert(short.to_owned(), spec.value.to_json());
            } else {
                let entry = root
                    .entry(spec.section.clone())
                    .or_insert_with(|| JsonValue::Object(JsonMap::new()));
                if let JsonValue::Object(map) = entry {
                    map.insert(short.to_owned(), spec.value.to_json());
                }
            }
        }
        JsonValue::Object(root)
    }

    /// Render help text for one section, or for every visible section when
    /// `section` is `*`. Hidden options never appear.
    pub fn render_help(&self, section: &str) -> String {
        let mut out = String::new();
        let width = self
            .options
            .values()
            .filter(|s| !s.hidden)
            .map(|s| s.name.len() + s.default.kind().len() + 5)
            .max()
            .unwrap_or(0);

        let mut printed_any = false;
        for sec in &self.sections {
            if sec.hidden || (section != "*" && sec.name != section) {
                continue;
            }
            let visible: Vec<&OptionSpec> = self
                .options
                .values()
                .filter(|s| !s.hidden && s.section == sec.name)
                .collect();
            if visible.is_empty() {
                continue;
            }
            printed_any = true;
            if sec.name.is_empty() {
                let _ = writeln!(out, "{}:", sec.title);
            } else {
                let _ = writeln!(out, "Section '{}' ({}):", sec.name, sec.title);
            }
            for spec in visible {
                let flag = format!("--{} <{}>", spec.name, spec.default.kind());
                let _ = writeln!(
                    out,
                    "  {flag:width$}  {} (default: {})",
                    spec.description, spec.default
                );
            }
            out.push('\n');
        }
        if !printed_any {
            let _ = writeln!(out, "no help available for section '{section}'");
        }
        out
    }
}
