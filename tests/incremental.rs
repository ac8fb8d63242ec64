//! Incremental builds against a real directory tree.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tempfile::TempDir;

use kiln::module::{COMPILE_NAMESPACE, meta_key};
use kiln::{Build, BuildConfig, CompileOutput, Compiler, DiskFs, EvictOptions, ModuleEvent};

#[derive(Default)]
struct CountingCompiler {
    calls: Mutex<FxHashMap<PathBuf, usize>>,
}

impl CountingCompiler {
    fn calls(&self, filename: &Path) -> usize {
        self.calls.lock().get(filename).copied().unwrap_or(0)
    }

    fn total(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

fn imports(source: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| line.trim().strip_prefix("import "))
        .map(|spec| spec.trim().trim_matches('"').to_string())
        .collect()
}

#[async_trait]
impl Compiler for CountingCompiler {
    async fn compile(&self, source: &str, filename: &Path) -> anyhow::Result<CompileOutput> {
        *self
            .calls
            .lock()
            .entry(filename.to_path_buf())
            .or_default() += 1;
        Ok(CompileOutput {
            code: source.to_uppercase(),
            imports: imports(source),
        })
    }

    async fn scan_imports(&self, source: &str, _filename: &Path) -> anyhow::Result<Vec<String>> {
        Ok(imports(source))
    }
}

struct Project {
    _dir: TempDir,
    root: PathBuf,
    config: BuildConfig,
    compiler: Arc<CountingCompiler>,
}

impl Project {
    /// `src/a.js` imports `src/b.js`; `src/c.js` stands alone.
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();

        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/a.js"), "import \"./b\"\nexport a").unwrap();
        std::fs::write(root.join("src/b.js"), "export b").unwrap();
        std::fs::write(root.join("src/c.js"), "export c").unwrap();
        std::fs::write(
            root.join("kiln.toml"),
            "[cache]\nroot = \".kiln/cache\"\n\n[resolver]\ncompilation_roots = [\"src\"]\n",
        )
        .unwrap();

        let config = BuildConfig::load(&root.join("kiln.toml")).unwrap();
        Self {
            _dir: dir,
            root,
            config,
            compiler: Arc::new(CountingCompiler::default()),
        }
    }

    /// A fresh build, as a new process would create it.
    fn build(&self) -> Build {
        Build::new(self.config.clone(), Arc::new(DiskFs), self.compiler.clone())
    }

    fn src(&self, name: &str) -> PathBuf {
        self.root.join("src").join(name)
    }

    fn entries(&self) -> Vec<PathBuf> {
        vec![self.src("a.js"), self.src("c.js")]
    }

    /// Move a file's mtime forward without touching its bytes.
    fn touch(&self, name: &str) {
        let file = File::options().write(true).open(self.src(name)).unwrap();
        let later = SystemTime::now() + Duration::from_secs(60);
        file.set_modified(later).unwrap();
    }
}

#[tokio::test]
async fn test_config_resolves_against_project_dir() {
    let project = Project::new();
    assert_eq!(project.config.cache.root, project.root.join(".kiln/cache"));
    assert_eq!(project.config.resolver.compilation_roots, vec![project.root.join("src")]);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let project = Project::new();

    let first = project.build();
    let modules = first.pass(&project.entries()).await.unwrap();
    let output: Vec<_> = modules.iter().map(|m| m.load()).collect();
    assert_eq!(project.compiler.total(), 3);

    let second = project.build();
    let modules = second.pass(&project.entries()).await.unwrap();
    let rebuilt: Vec<_> = modules.iter().map(|m| m.load()).collect();

    assert_eq!(output, rebuilt);
    assert_eq!(project.compiler.total(), 3);
}

#[tokio::test]
async fn test_touching_dependency_rebuilds_importer() {
    let project = Project::new();
    project.build().pass(&project.entries()).await.unwrap();

    project.touch("b.js");
    project.build().pass(&project.entries()).await.unwrap();

    assert_eq!(project.compiler.calls(&project.src("a.js")), 2);
    assert_eq!(project.compiler.calls(&project.src("b.js")), 2);
    assert_eq!(project.compiler.calls(&project.src("c.js")), 1);
}

#[tokio::test]
async fn test_touching_unrelated_file_rebuilds_nothing_else() {
    let project = Project::new();
    project.build().pass(&project.entries()).await.unwrap();

    project.touch("c.js");
    project.build().pass(&project.entries()).await.unwrap();

    assert_eq!(project.compiler.calls(&project.src("a.js")), 1);
    assert_eq!(project.compiler.calls(&project.src("b.js")), 1);
    assert_eq!(project.compiler.calls(&project.src("c.js")), 2);
}

#[tokio::test]
async fn test_watch_session_rebuild() {
    let project = Project::new();
    let build = project.build();
    build.pass(&project.entries()).await.unwrap();

    project.touch("b.js");
    let modules = build.pass(&project.entries()).await.unwrap();

    assert_eq!(modules[0].dependencies(), vec![project.src("b.js")]);
    assert_eq!(project.compiler.calls(&project.src("a.js")), 2);
    assert_eq!(project.compiler.calls(&project.src("c.js")), 1);
}

#[tokio::test]
async fn test_evict_with_recompile_drops_dependents() {
    let project = Project::new();
    let build = project.build();
    build.pass(&project.entries()).await.unwrap();
    let mut events = build.context().subscribe();

    build
        .context()
        .evict(&build.factory(), &project.src("b.js"), EvictOptions::recompile())
        .await
        .unwrap();

    assert!(build.context().loaded(&project.src("a.js")).is_none());
    assert!(build.context().loaded(&project.src("c.js")).is_some());
    let ModuleEvent::Evicted { filename, recompile } = events.recv().await.unwrap();
    assert_eq!(filename, project.src("a.js"));
    assert!(recompile);
}

#[tokio::test]
async fn test_cache_layout_on_disk() {
    let project = Project::new();
    let build = project.build();
    build.pass(&project.entries()).await.unwrap();

    let compiled = build
        .cache()
        .create(COMPILE_NAMESPACE)
        .storage_path(&project.src("a.js").to_string_lossy());
    assert_eq!(std::fs::read_to_string(&compiled).unwrap(), "IMPORT \"./B\"\nEXPORT A");
    assert!(Path::new(&format!("{}.stats", compiled.display())).is_file());
    assert!(Path::new(&format!("{}.imports.json", compiled.display())).is_file());

    let record = build
        .context()
        .cache()
        .storage_path(&meta_key(&project.src("a.js")));
    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(record).unwrap()).unwrap();
    assert_eq!(
        record["dependencies"],
        serde_json::json!([project.src("b.js")])
    );
}

#[tokio::test]
async fn test_clean_forces_full_rebuild() {
    let project = Project::new();
    let build = project.build();
    build.pass(&project.entries()).await.unwrap();

    build.clean().await.unwrap();
    assert!(!build.cache_root().exists());

    project.build().pass(&project.entries()).await.unwrap();
    assert_eq!(project.compiler.total(), 6);
}
