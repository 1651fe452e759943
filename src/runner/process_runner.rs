use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::CommandSpec;
use crate::error::DispatchError;
use crate::functions::{
    DispatchFuture, DispatchOutcome, DispatchRequest, FileRole, FileSet, FunctionDispatcher,
    FunctionRegistry, ProcessingError,
};
use crate::process;

/// Runs each function as the external command configured for it.
#[derive(Debug, Clone)]
pub struct ProcessDispatcher {
    registry: Arc<FunctionRegistry>,
    root: PathBuf,
}

impl ProcessDispatcher {
    /// `root` is the directory relative `cwd` settings resolve against.
    pub fn new(registry: Arc<FunctionRegistry>, root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            root: root.into(),
        }
    }
}

impl FunctionDispatcher for ProcessDispatcher {
    fn dispatch(&self, request: DispatchRequest) -> DispatchFuture {
        let spec = self.registry.get(&request.function).cloned();
        let root = self.root.clone();

        Box::pin(async move {
            let function = request.function;
            let Some(spec) = spec else {
                return Err(DispatchError::NoCommand(function));
            };
            let Some(command) = spec.command.as_ref() else {
                return Err(DispatchError::NoCommand(function));
            };

            let command = render_command(command, &request.files);
            let workdir = resolve_workdir(&root, spec.cwd.as_ref());
            debug!(
                function = %function,
                program = %command.program,
                args = ?command.args,
                workdir = %workdir.display(),
                "launching function"
            );

            let output = process::run_command(&command, &spec.env, &workdir, spec.timeout).await?;
            let Some(code) = output.code else {
                return Err(DispatchError::Terminated { function });
            };

            Ok(build_outcome(
                &function,
                spec.collect_results,
                code,
                &output.stdout,
                &output.stderr,
            ))
        })
    }
}

/// Substitute `{role}` references with the unit's files. An argument that is
/// exactly a reference to an unassigned role is dropped.
fn render_command(spec: &CommandSpec, files: &FileSet) -> CommandSpec {
    CommandSpec {
        program: render_arg(&spec.program, files).unwrap_or_else(|| spec.program.clone()),
        args: spec
            .args
            .iter()
            .filter_map(|arg| render_arg(arg, files))
            .collect(),
    }
}

fn render_arg(arg: &str, files: &FileSet) -> Option<String> {
    let mut out = arg.to_string();
    for role in FileRole::ALL {
        let key = format!("{{{}}}", role.as_str());
        if !out.contains(&key) {
            continue;
        }
        match files.get(role) {
            Some(path) => out = out.replace(&key, &path.to_string_lossy()),
            None if arg == key => return None,
            None => out = out.replace(&key, ""),
        }
    }
    Some(out)
}

fn build_outcome(
    function: &str,
    collect_results: bool,
    code: i32,
    stdout: &[u8],
    stderr: &[u8],
) -> DispatchOutcome {
    let results = if collect_results {
        String::from_utf8_lossy(stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.split(',').map(|field| field.trim().to_string()).collect())
            .collect()
    } else {
        Vec::new()
    };

    let errors = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| ProcessingError {
            function: function.to_string(),
            message: line.to_string(),
        })
        .collect();

    DispatchOutcome {
        status: code,
        results,
        errors,
    }
}

fn resolve_workdir(root: &Path, maybe_cwd: Option<&String>) -> PathBuf {
    if let Some(cwd) = maybe_cwd {
        let path = Path::new(cwd);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        if let Some(stripped) = path.to_str()
            && let Some(rest) = stripped.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(rest);
        }
        root.join(path)
    } else {
        root.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandModel;
    use crate::functions::FunctionSpec;

    fn files() -> FileSet {
        FileSet {
            input: Some(PathBuf::from("in.csv")),
            output: Some(PathBuf::from("out.x9")),
            ..FileSet::default()
        }
    }

    #[test]
    fn render_substitutes_and_drops_missing_roles() {
        let spec = CommandSpec {
            program: "x9write".to_string(),
            args: vec![
                "{input}".to_string(),
                "{secondary}".to_string(),
                "--out={output}".to_string(),
                "--hdr={secondary}".to_string(),
            ],
        };
        let rendered = render_command(&spec, &files());
        assert_eq!(rendered.program, "x9write");
        assert_eq!(rendered.args, vec!["in.csv", "--out=out.x9", "--hdr="]);
    }

    #[test]
    fn outcome_collects_rows_and_errors() {
        let outcome = build_outcome("draw", true, 1, b"a, 1\n\nb,2\n", b"warn one\n  \n");
        assert_eq!(outcome.status, 1);
        assert_eq!(
            outcome.results,
            vec![
                vec!["a".to_string(), "1".to_string()],
                vec!["b".to_string(), "2".to_string()]
            ]
        );
        assert_eq!(
            outcome.errors,
            vec![ProcessingError {
                function: "draw".to_string(),
                message: "warn one".to_string()
            }]
        );

        let outcome = build_outcome("draw", false, 0, b"a,1\n", b"");
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn workdir_resolution() {
        let root = Path::new("/work");
        assert_eq!(resolve_workdir(root, None), PathBuf::from("/work"));
        assert_eq!(
            resolve_workdir(root, Some(&"sub".to_string())),
            PathBuf::from("/work/sub")
        );
        assert_eq!(
            resolve_workdir(root, Some(&"/abs".to_string())),
            PathBuf::from("/abs")
        );
    }

    fn request(function: &str) -> DispatchRequest {
        DispatchRequest {
            index: 0,
            function: function.to_string(),
            files: FileSet::default(),
            command: CommandModel::default(),
        }
    }

    #[tokio::test]
    async fn function_without_command_fails() {
        let registry = Arc::new(FunctionRegistry::new(vec![FunctionSpec::new("console")]));
        let dispatcher = ProcessDispatcher::new(registry, ".");
        let err = dispatcher.dispatch(request("console")).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoCommand(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_configured_command() {
        let mut spec = FunctionSpec::new("count");
        spec.command = Some(CommandSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo a,1; echo bad >&2; exit 2".to_string()],
        });
        spec.collect_results = true;
        let dispatcher = ProcessDispatcher::new(Arc::new(FunctionRegistry::new(vec![spec])), ".");

        let outcome = dispatcher.dispatch(request("count")).await.unwrap();
        assert_eq!(outcome.status, 2);
        assert_eq!(outcome.results, vec![vec!["a".to_string(), "1".to_string()]]);
        assert_eq!(outcome.errors.len(), 1);
    }
}
