use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::models::Language;

const DEFAULT_JAVA_CLASS: &str = "Solution";
const CPP_BINARY: &str = "solution";

/// How a language is written to disk, built and started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub source_file: String,
    pub compile: Option<(String, Vec<String>)>,
    run: RunTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RunTarget {
    Interpreter(String, Vec<String>),
    /// Binary produced in the workspace by the compile step
    Binary(String),
}

impl Toolchain {
    pub fn for_language(language: Language, code: &str) -> Self {
        match language {
            Language::Python => Self {
                source_file: "solution.py".to_string(),
                compile: None,
                run: RunTarget::Interpreter(
                    "python3".to_string(),
                    vec!["-u".to_string(), "solution.py".to_string()],
                ),
            },
            Language::Javascript => Self {
                source_file: "solution.js".to_string(),
                compile: None,
                run: RunTarget::Interpreter("node".to_string(), vec!["solution.js".to_string()]),
            },
            Language::Cpp => Self {
                source_file: "solution.cpp".to_string(),
                compile: Some((
                    "g++".to_string(),
                    vec![
                        "-std=c++17".to_string(),
                        "-O2".to_string(),
                        "-o".to_string(),
                        CPP_BINARY.to_string(),
                        "solution.cpp".to_string(),
                    ],
                )),
                run: RunTarget::Binary(CPP_BINARY.to_string()),
            },
            Language::Java => {
                let class = java_class_name(code);
                Self {
                    source_file: format!("{}.java", class),
                    compile: Some(("javac".to_string(), vec![format!("{}.java", class)])),
                    run: RunTarget::Interpreter(
                        "java".to_string(),
                        vec!["-cp".to_string(), ".".to_string(), class],
                    ),
                }
            }
        }
    }

    /// Program and arguments that start the solution inside `workdir`
    pub fn run_command(&self, workdir: &Path) -> (String, Vec<String>) {
        match &self.run {
            RunTarget::Interpreter(program, args) => (program.clone(), args.clone()),
            RunTarget::Binary(name) => (workdir.join(name).to_string_lossy().into_owned(), vec![]),
        }
    }
}

/// Name of the class javac must see in a file of the same name.
/// Prefers a public class, then any class, then `Solution`.
pub fn java_class_name(code: &str) -> String {
    static PUBLIC_CLASS: OnceLock<Option<Regex>> = OnceLock::new();
    static ANY_CLASS: OnceLock<Option<Regex>> = OnceLock::new();

    let public = PUBLIC_CLASS.get_or_init(|| Regex::new(r"public\s+(?:final\s+)?class\s+(\w+)").ok());
    let any = ANY_CLASS.get_or_init(|| Regex::new(r"class\s+(\w+)").ok());

    [public, any]
        .into_iter()
        .flatten()
        .find_map(|re| re.captures(code))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| DEFAULT_JAVA_CLASS.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn java_class_prefers_public_class() {
        let code = "class Helper {}\npublic class Main { public static void main(String[] a) {} }";
        assert_eq!(java_class_name(code), "Main");
    }

    #[test]
    fn java_class_falls_back() {
        assert_eq!(java_class_name("class Foo {}"), "Foo");
        assert_eq!(java_class_name("interface X {}"), "Solution");
    }

    #[test]
    fn java_toolchain_uses_class_file_name() {
        let toolchain = Toolchain::for_language(Language::Java, "public class Main {}");
        assert_eq!(toolchain.source_file, "Main.java");
        let (program, args) = toolchain.run_command(Path::new("/tmp/ws"));
        assert_eq!(program, "java");
        assert_eq!(args, vec!["-cp", ".", "Main"]);
    }

    #[test]
    fn cpp_runs_compiled_binary_from_workspace() {
        let toolchain = Toolchain::for_language(Language::Cpp, "int main() {}");
        let (compiler, args) = toolchain.compile.clone().unwrap();
        assert_eq!(compiler, "g++");
        assert!(args.contains(&"-std=c++17".to_string()));

        let (program, args) = toolchain.run_command(Path::new("/tmp/ws"));
        assert_eq!(PathBuf::from(program), PathBuf::from("/tmp/ws/solution"));
        assert!(args.is_empty());
    }

    #[test]
    fn interpreted_languages_skip_compilation() {
        for language in [Language::Python, Language::Javascript] {
            assert!(Toolchain::for_language(language, "").compile.is_none());
        }
    }
}
