use super::{RuleGroup, RuleSpec};

const NODE: &[&str] = &["package.json"];
const GRADLE: &[&str] = &[
    "build.gradle",
    "build.gradle.kts",
    "settings.gradle",
    "settings.gradle.kts",
];
const DOTNET: &[&str] = &["*.csproj", "*.fsproj", "*.vbproj", "*.sln"];
const PY_TOOLS: &[&str] = &["pyproject.toml", "setup.py", "setup.cfg", "tox.ini"];
const USER_CACHE: &str = "**/{.cache,Library/Caches,AppData/Local}";

/// The built-in rule table, in declaration order.
pub fn builtin_rules() -> Vec<RuleSpec> {
    use RuleGroup::*;

    vec![
        // JavaScript / TypeScript
        RuleSpec::new("node-modules", Deps, "node_modules").sibling(NODE),
        RuleSpec::new("bower-components", Deps, "bower_components").sibling(&["bower.json"]),
        RuleSpec::new("next-build", Build, ".next").sibling(NODE),
        RuleSpec::new("nuxt-build", Build, ".nuxt").sibling(NODE),
        RuleSpec::new("svelte-kit", Build, ".svelte-kit").sibling(NODE),
        RuleSpec::new("turbo-cache", Build, ".turbo").sibling(NODE),
        RuleSpec::new("parcel-cache", Build, ".parcel-cache"),
        RuleSpec::new("angular-cache", Build, "cache").under("**/.angular"),
        RuleSpec::new("yarn-cache", Caches, "cache").under("**/.yarn"),
        RuleSpec::new("yarn-berry-cache", Caches, "cache").under("**/.yarn/berry"),
        RuleSpec::new("npm-cache", Caches, "_cacache").under("**/.npm"),
        RuleSpec::new("pnpm-store", Caches, "store").under("**/pnpm"),
        // Rust
        RuleSpec::new("rust-target", Build, "target").sibling(&["Cargo.toml"]),
        RuleSpec::new("cargo-registry", Caches, "registry").under("**/.cargo"),
        RuleSpec::new("cargo-git", Caches, "git").under("**/.cargo"),
        RuleSpec::new("rustup-downloads", Toolchain, "{downloads,tmp}").under("**/.rustup"),
        // JVM
        RuleSpec::new("maven-target", Build, "target").sibling(&["pom.xml"]),
        RuleSpec::new("sbt-target", Build, "target").sibling(&["build.sbt"]),
        RuleSpec::new("gradle-build", Build, "build").sibling(GRADLE),
        RuleSpec::new("gradle-project-cache", Build, ".gradle").sibling(GRADLE),
        RuleSpec::new("gradle-caches", Caches, "caches").under("**/.gradle"),
        RuleSpec::new("gradle-wrapper-dists", Toolchain, "dists").under("**/.gradle/wrapper"),
        RuleSpec::new("maven-repository", Caches, "repository")
            .under("**/.m2")
            .confirm(),
        RuleSpec::new("ivy-cache", Caches, "cache").under("**/.ivy2"),
        RuleSpec::new("sbt-boot", Caches, "boot").under("**/.sbt"),
        RuleSpec::new("coursier-cache", Caches, "{coursier,Coursier}").under(USER_CACHE),
        // .NET
        RuleSpec::new("dotnet-bin", Build, "bin").sibling(DOTNET),
        RuleSpec::new("dotnet-obj", Build, "obj").sibling(DOTNET),
        RuleSpec::new("nuget-packages", Caches, "packages")
            .under("**/.nuget")
            .confirm(),
        // Python
        RuleSpec::new("python-venv", Venv, "*").child(&["pyvenv.cfg"]),
        RuleSpec::new("conda-env", Venv, "*")
            .child(&["conda-meta"])
            .under("**/envs")
            .confirm(),
        RuleSpec::new("pycache", Build, "__pycache__"),
        RuleSpec::new("pytest-cache", Build, ".pytest_cache"),
        RuleSpec::new("mypy-cache", Build, ".mypy_cache"),
        RuleSpec::new("ruff-cache", Build, ".ruff_cache"),
        RuleSpec::new("tox-envs", Venv, ".tox").sibling(PY_TOOLS),
        RuleSpec::new("nox-envs", Venv, ".nox").sibling(&["noxfile.py"]),
        RuleSpec::new("egg-info", Build, "*.egg-info"),
        RuleSpec::new("eggs", Build, ".eggs").sibling(PY_TOOLS),
        RuleSpec::new("ipynb-checkpoints", Build, ".ipynb_checkpoints"),
        RuleSpec::new("pip-cache", Caches, "pip").under(USER_CACHE),
        // Go
        RuleSpec::new("go-mod-cache", Caches, "mod")
            .under("**/go/pkg")
            .confirm(),
        RuleSpec::new("go-build-cache", Caches, "go-build").under(USER_CACHE),
        // Ruby / PHP / Elixir / Dart
        RuleSpec::new("ruby-bundle", Deps, "bundle").under("**/vendor"),
        RuleSpec::new("bundler-cache", Caches, "cache").under("**/.bundle"),
        RuleSpec::new("php-vendor", Deps, "vendor").sibling(&["composer.json"]),
        RuleSpec::new("composer-cache", Caches, "cache").under("**/.composer"),
        RuleSpec::new("composer-cache-xdg", Caches, "composer").under(USER_CACHE),
        RuleSpec::new("elixir-build", Build, "_build").sibling(&["mix.exs"]),
        RuleSpec::new("elixir-deps", Deps, "deps").sibling(&["mix.exs"]),
        RuleSpec::new("dart-tool", Build, ".dart_tool").sibling(&["pubspec.yaml"]),
        // Haskell / Zig / C / C++ / Terraform
        RuleSpec::new("stack-work", Build, ".stack-work").sibling(&["stack.yaml"]),
        RuleSpec::new("cabal-dist", Build, "dist-newstyle").sibling(&["*.cabal", "cabal.project"]),
        RuleSpec::new("zig-cache", Build, "{zig-cache,.zig-cache}").sibling(&["build.zig"]),
        RuleSpec::new("zig-out", Build, "zig-out").sibling(&["build.zig"]),
        RuleSpec::new("cmake-build", Build, "cmake-build-*").sibling(&["CMakeLists.txt"]),
        RuleSpec::new("cmake-out-of-source", Build, "*")
            .child(&["CMakeCache.txt"])
            .unless(&["CMakeLists.txt"]),
        RuleSpec::new("terraform-providers", Build, ".terraform").sibling(&["*.tf"]),
        // Swift / Xcode / CocoaPods
        RuleSpec::new("swiftpm-build", Build, ".build").sibling(&["Package.swift"]),
        RuleSpec::new("swiftpm-state", Build, ".swiftpm").sibling(&["Package.swift"]),
        RuleSpec::new("cocoapods", Deps, "Pods").sibling(&["Podfile"]),
        RuleSpec::new("carthage-build", Build, "Build").under("**/Carthage"),
        RuleSpec::new("xcode-deriveddata", Xcode, "DerivedData").under("**/Library/Developer/Xcode"),
        RuleSpec::new("xcode-project-deriveddata", Xcode, "DerivedData")
            .sibling(&["*.xcodeproj", "*.xcworkspace"]),
        RuleSpec::new("xcode-archives", Xcode, "Archives")
            .under("**/Library/Developer/Xcode")
            .confirm(),
        RuleSpec::new("xcode-device-support", Xcode, "*DeviceSupport")
            .under("**/Library/Developer/Xcode"),
        RuleSpec::new("xcode-previews", Xcode, "Previews")
            .under("**/Library/Developer/Xcode/UserData"),
        RuleSpec::new("simulator-caches", Xcode, "Caches").under("**/Library/Developer/CoreSimulator"),
        RuleSpec::new("simulator-devices", Xcode, "Devices")
            .under("**/Library/Developer/CoreSimulator")
            .confirm(),
        // Docker
        RuleSpec::new("docker-desktop-vm", Docker, "vms")
            .under("**/Library/Containers/com.docker.docker/Data")
            .confirm(),
        RuleSpec::new("docker-buildx-cache", Docker, "cache").under("**/.docker/buildx"),
        RuleSpec::new("docker-engine-data", Docker, "docker")
            .under("/var/lib")
            .confirm(),
        // IDEs
        RuleSpec::new("jetbrains-caches", Ide, "caches").under("**/JetBrains/*"),
        RuleSpec::new("vscode-cached-data", Ide, "{CachedData,CachedExtensionVSIXs}")
            .under("**/Code"),
        RuleSpec::new("vscode-workspace-storage", Ide, "workspaceStorage")
            .under("**/Code/User")
            .confirm(),
        // Browsers used by test runners, misc tooling
        RuleSpec::new("cypress-cache", Caches, "Cypress").under(USER_CACHE),
        RuleSpec::new("playwright-browsers", Caches, "ms-playwright").under(USER_CACHE),
        RuleSpec::new("puppeteer-browsers", Caches, "puppeteer").under(USER_CACHE),
        RuleSpec::new("homebrew-cache", Caches, "Homebrew").under("**/Library/Caches"),
        RuleSpec::new("vagrant-boxes", Toolchain, "boxes")
            .under("**/.vagrant.d")
            .confirm(),
        // Broad cache roots; walked further so the specific rules above
        // still classify what lives inside them.
        RuleSpec::new("user-cache", Caches, ".cache")
            .under("**/{home,Users}/*")
            .confirm()
            .descend(),
        RuleSpec::new("library-caches", Caches, "Caches")
            .under("**/Users/*/Library")
            .confirm()
            .descend(),
    ]
}
