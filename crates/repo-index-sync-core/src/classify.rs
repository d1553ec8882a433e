//! File classification.
//!
//! Maps a file name to exactly one [`Category`]. The mapping is total and
//! deterministic: well-known file names are matched first, then the
//! lower-cased extension. Anything unrecognised lands in
//! [`FALLBACK_CATEGORY`] (`markup`), so every tracked file belongs to one
//! category index.
//!
//! The module also derives the rest of the member metadata: MIME type,
//! line count and the name a blob is uploaded under.

use crate::models::{Category, FileMetadata};

/// Category for files whose name and extension are not recognised.
pub const FALLBACK_CATEGORY: Category = Category::Markup;

const CODE_EXTENSIONS: &[&str] = &[
    "bash", "bat", "c", "cc", "cjs", "clj", "cpp", "cs", "cxx", "dart", "ex", "exs", "erl", "fs",
    "go", "groovy", "h", "hh", "hpp", "hs", "java", "js", "jsx", "kt", "kts", "lua", "m", "mjs",
    "ml", "mm", "php", "pl", "ps1", "py", "r", "rb", "rs", "scala", "sh", "sql", "svelte",
    "swift", "ts", "tsx", "vue", "zig", "zsh",
];

const MARKUP_EXTENSIONS: &[&str] = &[
    "adoc", "css", "csv", "htm", "html", "less", "markdown", "md", "mdx", "rst", "sass", "scss",
    "svg", "tex", "txt", "xhtml", "xml",
];

const CONFIG_EXTENSIONS: &[&str] = &[
    "cfg", "conf", "env", "gradle", "ini", "json", "json5", "lock", "properties", "tf", "toml",
    "yaml", "yml",
];

const CONFIG_FILE_NAMES: &[&str] = &[
    ".dockerignore",
    ".editorconfig",
    ".env",
    ".gitattributes",
    ".gitignore",
    ".gitmodules",
    ".npmrc",
    ".nvmrc",
    "cmakelists.txt",
    "docker-compose.yml",
    "dockerfile",
    "pom.xml",
];

const CODE_FILE_NAMES: &[&str] = &["gemfile", "jenkinsfile", "makefile", "rakefile"];

/// Extensions the index provider ingests as-is. Other blobs get a `.txt`
/// suffix on upload.
const UPLOADABLE_EXTENSIONS: &[&str] = &[
    "c", "cpp", "cs", "css", "go", "html", "java", "js", "json", "md", "php", "py", "rb", "sh",
    "tex", "ts", "txt",
];

/// Classify a file by name (a bare name or a `/`-separated path).
pub fn classify(file_name: &str) -> Category {
    let name = base_name(file_name).to_ascii_lowercase();

    if CONFIG_FILE_NAMES.contains(&name.as_str()) {
        return Category::Config;
    }
    if CODE_FILE_NAMES.contains(&name.as_str()) {
        return Category::Code;
    }

    let ext = extension(&name);
    if CODE_EXTENSIONS.contains(&ext.as_str()) {
        Category::Code
    } else if CONFIG_EXTENSIONS.contains(&ext.as_str()) {
        Category::Config
    } else if MARKUP_EXTENSIONS.contains(&ext.as_str()) {
        Category::Markup
    } else {
        FALLBACK_CATEGORY
    }
}

/// Last path segment.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Lower-cased extension without the dot; empty for dotfiles and
/// extensionless names.
pub fn extension(file_name: &str) -> String {
    let name = base_name(file_name);
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(pos) => name[pos + 1..].to_ascii_lowercase(),
    }
}

/// MIME type for an extension (as returned by [`extension`]).
pub fn mime_type(extension: &str) -> &'static str {
    match extension {
        "c" | "h" => "text/x-c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" => "text/x-c++",
        "cs" => "text/x-csharp",
        "css" => "text/css",
        "csv" => "text/csv",
        "go" => "text/x-golang",
        "htm" | "html" | "xhtml" => "text/html",
        "java" => "text/x-java-source",
        "js" | "mjs" | "cjs" | "jsx" => "text/javascript",
        "json" | "json5" => "application/json",
        "kt" | "kts" => "text/x-kotlin",
        "md" | "markdown" | "mdx" => "text/markdown",
        "php" => "text/x-php",
        "py" => "text/x-python",
        "rb" => "text/x-ruby",
        "rs" => "text/x-rust",
        "rst" => "text/x-rst",
        "sh" | "bash" | "zsh" => "application/x-sh",
        "sql" => "application/sql",
        "svg" => "image/svg+xml",
        "tex" => "text/x-tex",
        "toml" => "application/toml",
        "ts" | "tsx" => "application/typescript",
        "xml" => "application/xml",
        "yaml" | "yml" => "text/yaml",
        _ => "text/plain",
    }
}

/// Name the blob is uploaded under. The original name is kept when the
/// provider accepts its extension, otherwise `.txt` is appended.
pub fn upload_name(file_name: &str) -> String {
    let name = base_name(file_name);
    let ext = extension(name);
    if UPLOADABLE_EXTENSIONS.contains(&ext.as_str()) {
        name.to_string()
    } else {
        format!("{}.txt", name)
    }
}

/// Count lines the way a line reader does: every `\n`-terminated line plus
/// a trailing unterminated one.
pub fn count_lines(bytes: &[u8]) -> u64 {
    if bytes.is_empty() {
        return 0;
    }
    let newlines = bytes.iter().filter(|&&b| b == b'\n').count() as u64;
    if bytes.last() == Some(&b'\n') {
        newlines
    } else {
        newlines + 1
    }
}

/// Build the full member metadata for a file at `path` with `bytes`.
pub fn describe(path: &str, bytes: &[u8]) -> FileMetadata {
    let ext = extension(path);
    FileMetadata {
        name: base_name(path).to_string(),
        path: path.to_string(),
        mime_type: mime_type(&ext).to_string(),
        extension: ext,
        line_count: count_lines(bytes),
        category: classify(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension() {
        assert_eq!(classify("Main.java"), Category::Code);
        assert_eq!(classify("src/lib.rs"), Category::Code);
        assert_eq!(classify("README.md"), Category::Markup);
        assert_eq!(classify("index.HTML"), Category::Markup);
        assert_eq!(classify("deploy/values.yaml"), Category::Config);
        assert_eq!(classify("Cargo.toml"), Category::Config);
        assert_eq!(classify("package.json"), Category::Config);
    }

    #[test]
    fn classifies_well_known_names() {
        assert_eq!(classify("Dockerfile"), Category::Config);
        assert_eq!(classify("sub/dir/.gitignore"), Category::Config);
        assert_eq!(classify("pom.xml"), Category::Config);
        assert_eq!(classify("Makefile"), Category::Code);
        assert_eq!(classify("CMakeLists.txt"), Category::Config);
    }

    #[test]
    fn unknown_extensions_fall_back_to_markup() {
        assert_eq!(FALLBACK_CATEGORY, Category::Markup);
        assert_eq!(classify("LICENSE"), Category::Markup);
        assert_eq!(classify("data.bin"), Category::Markup);
        assert_eq!(classify("weird.extension"), Category::Markup);
        assert_eq!(classify(""), Category::Markup);
    }

    #[test]
    fn never_classifies_as_aggregate() {
        for name in ["a.rs", "b.md", "c.yml", "d", ".e", "f.unknown"] {
            assert!(!classify(name).is_aggregate());
        }
    }

    #[test]
    fn extension_rules() {
        assert_eq!(extension("a/b/c.TAR.GZ"), "gz");
        assert_eq!(extension(".gitignore"), "");
        assert_eq!(extension("Makefile"), "");
        assert_eq!(extension("dir.d/file"), "");
    }

    #[test]
    fn upload_names() {
        assert_eq!(upload_name("src/Main.java"), "Main.java");
        assert_eq!(upload_name("Cargo.toml"), "Cargo.toml.txt");
        assert_eq!(upload_name("Makefile"), "Makefile.txt");
    }

    #[test]
    fn line_counting() {
        assert_eq!(count_lines(b""), 0);
        assert_eq!(count_lines(b"one"), 1);
        assert_eq!(count_lines(b"one\n"), 1);
        assert_eq!(count_lines(b"one\ntwo"), 2);
        assert_eq!(count_lines(b"\n\n"), 2);
    }

    #[test]
    fn describe_builds_metadata() {
        let meta = describe("config/app.yml", b"a: 1\nb: 2\n");
        assert_eq!(meta.name, "app.yml");
        assert_eq!(meta.extension, "yml");
        assert_eq!(meta.mime_type, "text/yaml");
        assert_eq!(meta.line_count, 2);
        assert_eq!(meta.category, Category::Config);
    }
}
