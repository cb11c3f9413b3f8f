//! Native build tools: one `BuildTool` implementation per supported backend.
//!
//! Each tool knows how to invoke itself for a target, where it puts the
//! files it builds, and what a no-op rebuild looks like.

use buildcheck_common::types::{ArtifactKind, Backend, Expected, Target};
use std::path::{Path, PathBuf};

/// Everything a tool needs to assemble one build invocation
#[derive(Debug, Clone)]
pub struct BuildContext<'a> {
    /// Build specification, relative to the directory the build runs in
    pub spec: &'a Path,
    pub target: &'a Target,
    pub configuration: &'a str,
    /// Generator `--depth`; make and ninja write their top-level files here
    pub depth: &'a str,
}

impl BuildContext<'_> {
    /// Spec file name without its extension, e.g. `hello` for `src/hello.gyp`
    fn stem(&self) -> String {
        self.spec
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Directory of the spec, where IDE generators drop their project files
fn spec_dir(spec: &Path) -> PathBuf {
    spec.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// The depth directory, empty when it is the build directory itself
fn depth_dir(depth: &str) -> PathBuf {
    match depth {
        "" | "." => PathBuf::new(),
        other => PathBuf::from(other),
    }
}

pub trait BuildTool: Send + Sync {
    fn backend(&self) -> Backend;

    fn default_program(&self) -> &'static str;

    /// Arguments for building `ctx.target`, excluding any configured extras
    fn build_args(&self, ctx: &BuildContext<'_>) -> Vec<String>;

    /// Directory, relative to the one the build runs in, that build outputs
    /// are laid out under
    fn output_root(&self, spec: &Path, depth: &str) -> PathBuf;

    /// Location of a built file relative to `output_root`
    fn built_file_path(&self, name: &str, kind: ArtifactKind, configuration: &str) -> PathBuf;

    /// What the tool prints when a rebuild has nothing to do
    fn up_to_date_signature(&self, target: &Target) -> Expected;

    fn host_supported(&self) -> bool {
        true
    }
}

pub fn tool_for(backend: Backend) -> Box<dyn BuildTool> {
    match backend {
        Backend::Make => Box::new(MakeTool),
        Backend::Ninja => Box::new(NinjaTool),
        Backend::Msvs => Box::new(MsvsTool),
        Backend::Xcode => Box::new(XcodeTool),
    }
}

pub struct MakeTool;

impl BuildTool for MakeTool {
    fn backend(&self) -> Backend {
        Backend::Make
    }

    fn default_program(&self) -> &'static str {
        "make"
    }

    fn build_args(&self, ctx: &BuildContext<'_>) -> Vec<String> {
        let mut args = Vec::new();
        let dir = depth_dir(ctx.depth);
        if !dir.as_os_str().is_empty() {
            args.push("-C".to_string());
            args.push(dir.display().to_string());
        }
        args.push(format!("BUILDTYPE={}", ctx.configuration));
        match ctx.target {
            Target::All => args.push("all".to_string()),
            Target::Default => {}
            Target::Named(name) => args.push(name.clone()),
        }
        args
    }

    fn output_root(&self, _spec: &Path, depth: &str) -> PathBuf {
        depth_dir(depth)
    }

    fn built_file_path(&self, name: &str, kind: ArtifactKind, configuration: &str) -> PathBuf {
        let out = Path::new("out").join(configuration);
        match kind {
            ArtifactKind::Executable => out.join(name),
            ArtifactKind::StaticLibrary => out.join("obj.target").join(format!("lib{}.a", name)),
            ArtifactKind::SharedLibrary => out.join("lib.target").join(format!("lib{}.so", name)),
        }
    }

    fn up_to_date_signature(&self, _target: &Target) -> Expected {
        // GNU make quotes the goal differently across versions
        Expected::Contains("Nothing to be done for".to_string())
    }
}

pub struct NinjaTool;

impl BuildTool for NinjaTool {
    fn backend(&self) -> Backend {
        Backend::Ninja
    }

    fn default_program(&self) -> &'static str {
        "ninja"
    }

    fn build_args(&self, ctx: &BuildContext<'_>) -> Vec<String> {
        let out = depth_dir(ctx.depth).join("out").join(ctx.configuration);
        let mut args = vec!["-C".to_string(), out.display().to_string()];
        match ctx.target {
            Target::All => args.push("all".to_string()),
            Target::Default => {}
            Target::Named(name) => args.push(name.clone()),
        }
        args
    }

    fn output_root(&self, _spec: &Path, depth: &str) -> PathBuf {
        depth_dir(depth)
    }

    fn built_file_path(&self, name: &str, kind: ArtifactKind, configuration: &str) -> PathBuf {
        let out = Path::new("out").join(configuration);
        match kind {
            ArtifactKind::Executable => out.join(name),
            ArtifactKind::StaticLibrary => out.join("obj").join(format!("lib{}.a", name)),
            ArtifactKind::SharedLibrary => out.join("lib").join(format!("lib{}.so", name)),
        }
    }

    fn up_to_date_signature(&self, _target: &Target) -> Expected {
        Expected::Contains("ninja: no work to do.".to_string())
    }
}

pub struct MsvsTool;

impl BuildTool for MsvsTool {
    fn backend(&self) -> Backend {
        Backend::Msvs
    }

    fn default_program(&self) -> &'static str {
        "devenv"
    }

    fn build_args(&self, ctx: &BuildContext<'_>) -> Vec<String> {
        let solution = spec_dir(ctx.spec).join(format!("{}.sln", ctx.stem()));
        let mut args = vec![
            solution.display().to_string(),
            "/Build".to_string(),
            ctx.configuration.to_string(),
        ];
        if let Target::Named(name) = ctx.target {
            args.push("/Project".to_string());
            args.push(name.clone());
        }
        args
    }

    fn output_root(&self, spec: &Path, _depth: &str) -> PathBuf {
        spec_dir(spec)
    }

    fn built_file_path(&self, name: &str, kind: ArtifactKind, configuration: &str) -> PathBuf {
        let out = Path::new(configuration);
        match kind {
            ArtifactKind::Executable => out.join(format!("{}.exe", name)),
            ArtifactKind::StaticLibrary => out.join("lib").join(format!("{}.lib", name)),
            ArtifactKind::SharedLibrary => out.join(format!("{}.dll", name)),
        }
    }

    fn up_to_date_signature(&self, _target: &Target) -> Expected {
        Expected::RegexDotall(
            r".*========== Build: 0 succeeded, 0 failed, \d+ up-to-date, 0 skipped ==========.*".to_string(),
        )
    }

    fn host_supported(&self) -> bool {
        cfg!(windows)
    }
}

pub struct XcodeTool;

impl BuildTool for XcodeTool {
    fn backend(&self) -> Backend {
        Backend::Xcode
    }

    fn default_program(&self) -> &'static str {
        "xcodebuild"
    }

    fn build_args(&self, ctx: &BuildContext<'_>) -> Vec<String> {
        let project = spec_dir(ctx.spec).join(format!("{}.xcodeproj", ctx.stem()));
        let mut args = vec![
            "-project".to_string(),
            project.display().to_string(),
            "-configuration".to_string(),
            ctx.configuration.to_string(),
        ];
        match ctx.target {
            Target::All => args.push("-alltargets".to_string()),
            Target::Default => {}
            Target::Named(name) => {
                args.push("-target".to_string());
                args.push(name.clone());
            }
        }
        args
    }

    fn output_root(&self, spec: &Path, _depth: &str) -> PathBuf {
        spec_dir(spec)
    }

    fn built_file_path(&self, name: &str, kind: ArtifactKind, configuration: &str) -> PathBuf {
        let out = Path::new("build").join(configuration);
        match kind {
            ArtifactKind::Executable => out.join(name),
            ArtifactKind::StaticLibrary => out.join(format!("lib{}.a", name)),
            ArtifactKind::SharedLibrary => out.join(format!("lib{}.dylib", name)),
        }
    }

    fn up_to_date_signature(&self, _target: &Target) -> Expected {
        // Only banners and the dependency check, no compile or link steps
        Expected::RegexDotall(
            r"(?:=== BUILD [^\n]*\n|Check dependencies\n|\n)*\*\* BUILD SUCCEEDED \*\*\n*".to_string(),
        )
    }

    fn host_supported(&self) -> bool {
        cfg!(target_os = "macos")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::matches;

    fn ctx<'a>(spec: &'a Path, target: &'a Target) -> BuildContext<'a> {
        BuildContext {
            spec,
            target,
            configuration: "Default",
            depth: ".",
        }
    }

    #[test]
    fn test_tool_for_each_backend() {
        for backend in Backend::ALL {
            assert_eq!(tool_for(backend).backend(), backend);
        }
    }

    #[test]
    fn test_make_args() {
        let tool = MakeTool;
        let spec = Path::new("hello.gyp");
        assert_eq!(
            tool.build_args(&ctx(spec, &Target::Named("hello".into()))),
            vec!["BUILDTYPE=Default", "hello"]
        );
        assert_eq!(tool.build_args(&ctx(spec, &Target::All)), vec!["BUILDTYPE=Default", "all"]);
        assert_eq!(tool.build_args(&ctx(spec, &Target::Default)), vec!["BUILDTYPE=Default"]);

        // The top-level Makefile lands in the depth dir, not beside the spec
        let nested = Path::new("src/hello.gyp");
        assert_eq!(
            tool.build_args(&ctx(nested, &Target::Default)),
            vec!["BUILDTYPE=Default"]
        );
        let deep = BuildContext {
            depth: "build",
            ..ctx(nested, &Target::All)
        };
        assert_eq!(tool.build_args(&deep), vec!["-C", "build", "BUILDTYPE=Default", "all"]);
    }

    #[test]
    fn test_ninja_args() {
        let tool = NinjaTool;
        let spec = Path::new("hello.gyp");
        let out = Path::new("out").join("Default").display().to_string();
        assert_eq!(
            tool.build_args(&ctx(spec, &Target::All)),
            vec!["-C".to_string(), out.clone(), "all".to_string()]
        );
        assert_eq!(tool.build_args(&ctx(spec, &Target::Default)), vec!["-C".to_string(), out.clone()]);

        let nested = Path::new("src/hello.gyp");
        let args = tool.build_args(&ctx(nested, &Target::All));
        assert_eq!(args[1], out);
        assert_eq!(args[2], "all");
    }

    #[test]
    fn test_output_roots() {
        let nested = Path::new("src/hello.gyp");
        assert_eq!(MakeTool.output_root(nested, "."), PathBuf::new());
        assert_eq!(NinjaTool.output_root(nested, "."), PathBuf::new());
        assert_eq!(NinjaTool.output_root(nested, "build"), Path::new("build"));
        assert_eq!(MsvsTool.output_root(nested, "."), Path::new("src"));
        assert_eq!(XcodeTool.output_root(nested, "."), Path::new("src"));
        assert_eq!(XcodeTool.output_root(Path::new("hello.gyp"), "."), PathBuf::new());
    }

    #[test]
    fn test_msvs_and_xcode_args() {
        let spec = Path::new("hello.gyp");
        let target = Target::Named("hello".into());
        assert_eq!(
            MsvsTool.build_args(&ctx(spec, &target)),
            vec!["hello.sln", "/Build", "Default", "/Project", "hello"]
        );
        assert_eq!(
            MsvsTool.build_args(&ctx(spec, &Target::All)),
            vec!["hello.sln", "/Build", "Default"]
        );
        assert_eq!(
            XcodeTool.build_args(&ctx(spec, &target)),
            vec!["-project", "hello.xcodeproj", "-configuration", "Default", "-target", "hello"]
        );
        assert_eq!(
            XcodeTool.build_args(&ctx(spec, &Target::All)).last().map(String::as_str),
            Some("-alltargets")
        );
    }

    #[test]
    fn test_built_file_paths() {
        assert_eq!(
            MakeTool.built_file_path("hello", ArtifactKind::Executable, "Default"),
            Path::new("out/Default/hello")
        );
        assert_eq!(
            MakeTool.built_file_path("lib1", ArtifactKind::StaticLibrary, "Release"),
            Path::new("out/Release/obj.target/liblib1.a")
        );
        assert_eq!(
            NinjaTool.built_file_path("foo", ArtifactKind::SharedLibrary, "Default"),
            Path::new("out/Default/lib/libfoo.so")
        );
        assert_eq!(
            MsvsTool.built_file_path("hello", ArtifactKind::Executable, "Default"),
            Path::new("Default/hello.exe")
        );
        assert_eq!(
            XcodeTool.built_file_path("foo", ArtifactKind::SharedLibrary, "Default"),
            Path::new("build/Default/libfoo.dylib")
        );
    }

    #[test]
    fn test_up_to_date_signatures() {
        let all = Target::All;
        assert!(matches(
            "make: Nothing to be done for 'all'.\n",
            &MakeTool.up_to_date_signature(&all)
        )
        .unwrap());
        assert!(matches(
            "ninja: Entering directory `out/Default'\nninja: no work to do.\n",
            &NinjaTool.up_to_date_signature(&all)
        )
        .unwrap());
        assert!(!matches(
            "[1/2] CC obj/hello.o\n[2/2] LINK hello\n",
            &NinjaTool.up_to_date_signature(&all)
        )
        .unwrap());
        assert!(matches(
            "Check dependencies\n\n** BUILD SUCCEEDED **\n\n",
            &XcodeTool.up_to_date_signature(&all)
        )
        .unwrap());
    }

    #[test]
    fn test_host_support() {
        assert!(MakeTool.host_supported());
        assert!(NinjaTool.host_supported());
        assert_eq!(MsvsTool.host_supported(), cfg!(windows));
        assert_eq!(XcodeTool.host_supported(), cfg!(target_os = "macos"));
    }
}
