use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use dashmap::DashMap;

/// One element of an argv template. Placeholders are resolved against the
/// job's parameter bag and the task's staged input/output files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgvToken {
    Literal(String),
    /// `{param:NAME}` - substituted with a job parameter.
    Param(String),
    /// `{input:NAME}` - a declared input file inside the working directory.
    Input(String),
    /// `{output:NAME}` - a declared output file inside the working directory.
    Output(String),
    /// `{inputs}` - every staged input file, in order. Used by reduce-style
    /// plugins whose input count is only known per task.
    AllInputs,
}

fn parse_token(raw: &str) -> ArgvToken {
    if raw == "{inputs}" {
        return ArgvToken::AllInputs;
    }
    if let Some(name) = raw.strip_prefix("{param:").and_then(|s| s.strip_suffix('}')) {
        return ArgvToken::Param(name.to_string());
    }
    if let Some(name) = raw.strip_prefix("{input:").and_then(|s| s.strip_suffix('}')) {
        return ArgvToken::Input(name.to_string());
    }
    if let Some(name) = raw.strip_prefix("{output:").and_then(|s| s.strip_suffix('}')) {
        return ArgvToken::Output(name.to_string());
    }
    ArgvToken::Literal(raw.to_string())
}

/// How to invoke one plugin kind: which image to run, with which argv, and
/// which files it reads and writes inside its working directory.
///
/// Descriptors are plain data registered at startup; there is no runtime
/// code loading.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub kind: String,
    pub image: String,
    pub argv: Vec<ArgvToken>,
    /// Fixed input file names, positionally matched to the task's input
    /// artifacts. Empty when `variadic_inputs` is set.
    pub expected_inputs: Vec<String>,
    pub variadic_inputs: bool,
    pub expected_outputs: Vec<String>,
}

impl PluginDescriptor {
    pub fn new(kind: &str, image: &str, argv: &[&str], inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            kind: kind.to_string(),
            image: image.to_string(),
            argv: argv.iter().map(|raw| parse_token(raw)).collect(),
            expected_inputs: inputs.iter().map(|s| s.to_string()).collect(),
            variadic_inputs: false,
            expected_outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Like `new`, for plugins that take any number of inputs.
    pub fn new_variadic(kind: &str, image: &str, argv: &[&str], outputs: &[&str]) -> Self {
        Self {
            kind: kind.to_string(),
            image: image.to_string(),
            argv: argv.iter().map(|raw| parse_token(raw)).collect(),
            expected_inputs: Vec::new(),
            variadic_inputs: true,
            expected_outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Local file names the task's input artifacts are staged under, in
    /// artifact order.
    pub fn local_input_names(&self, count: usize) -> Result<Vec<String>> {
        if self.variadic_inputs {
            return Ok((0..count).map(|i| format!("input-{:04}", i)).collect());
        }
        if count != self.expected_inputs.len() {
            bail!(
                "plugin {} expects {} input(s), task has {}",
                self.kind,
                self.expected_inputs.len(),
                count
            );
        }
        Ok(self.expected_inputs.clone())
    }

    /// Resolves the argv template against job parameters and staged inputs.
    pub fn render_argv(
        &self,
        params: &serde_json::Value,
        input_names: &[String],
    ) -> Result<Vec<String>> {
        let mut argv = Vec::with_capacity(self.argv.len());
        for token in &self.argv {
            match token {
                ArgvToken::Literal(value) => argv.push(value.clone()),
                ArgvToken::Input(name) | ArgvToken::Output(name) => argv.push(name.clone()),
                ArgvToken::AllInputs => argv.extend(input_names.iter().cloned()),
                ArgvToken::Param(name) => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| anyhow!("missing parameter {:?}", name))?;
                    let rendered = match value {
                        serde_json::Value::String(s) => s.clone(),
                        serde_json::Value::Number(n) => n.to_string(),
                        other => bail!("parameter {:?} is not a string or number: {}", name, other),
                    };
                    argv.push(rendered);
                }
            }
        }
        Ok(argv)
    }
}

/// Maps a task's `plugin_kind` to its invocation descriptor.
///
/// The same table serves both binaries: the worker uses the full descriptor
/// to run containers, the coordinator only consults the I/O contract when
/// naming output artifacts at submit time.
pub struct PluginRegistry {
    plugins: DashMap<String, Arc<PluginDescriptor>>,
}

impl PluginRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            plugins: DashMap::new(),
        })
    }

    /// The registry with every built-in plugin installed.
    pub fn builtin() -> Arc<Self> {
        let registry = Self::new();

        registry.register(PluginDescriptor::new(
            "hashcat",
            "crowd-hashcat-cpu:latest",
            &[
                "hashcat",
                "-m",
                "{param:hash_mode}",
                "-a",
                "0",
                "--potfile-disable",
                "--outfile",
                "{output:result.txt}",
                "{param:target_hash}",
                "{input:wordlist.txt}",
            ],
            &["wordlist.txt"],
            &["result.txt"],
        ));

        registry.register(PluginDescriptor::new(
            "sort_map",
            "crowd-sort:latest",
            &["sort", "-o", "{output:sorted.txt}", "{input:chunk.txt}"],
            &["chunk.txt"],
            &["sorted.txt"],
        ));

        // `sort -m` merges already-sorted inputs and keeps duplicates.
        registry.register(PluginDescriptor::new_variadic(
            "sort_reduce",
            "crowd-sort:latest",
            &["sort", "-m", "-o", "{output:final.txt}", "{inputs}"],
            &["final.txt"],
        ));

        registry
    }

    pub fn register(&self, descriptor: PluginDescriptor) {
        tracing::info!("Registered plugin {} ({})", descriptor.kind, descriptor.image);
        self.plugins
            .insert(descriptor.kind.clone(), Arc::new(descriptor));
    }

    pub fn get(&self, kind: &str) -> Option<Arc<PluginDescriptor>> {
        self.plugins.get(kind).map(|entry| entry.value().clone())
    }

    pub fn has(&self, kind: &str) -> bool {
        self.plugins.contains_key(kind)
    }

    /// Declared output file name for a kind, with a stable fallback for
    /// kinds this table does not know (the job will fail on the worker side
    /// with `plugin_unknown`, but it still needs an artifact name).
    pub fn declared_output(&self, kind: &str) -> String {
        self.get(kind)
            .and_then(|descriptor| descriptor.expected_outputs.first().cloned())
            .unwrap_or_else(|| format!("{}.out", kind))
    }
}
