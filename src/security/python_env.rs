//! Python environment lookup for the import rule
//!
//! Standard-library names come from `sys.stdlib_module_names` (3.10
//! through 3.13, removed modules included). Installed packages are found by
//! asking the interpreter for its `sys.path` once and probing those
//! directories.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use tracing::debug;

const PYTHON_STDLIB: &[&str] = &[
    "__future__", "_abc", "_aix_support", "_ast", "_asyncio", "_bisect", "_blake2", "_bootsubprocess",
    "_bz2", "_codecs", "_codecs_cn", "_codecs_hk", "_codecs_iso2022", "_codecs_jp", "_codecs_kr",
    "_codecs_tw", "_collections", "_collections_abc", "_colorize", "_compat_pickle", "_compression",
    "_contextvars", "_crypt", "_csv", "_ctypes", "_curses", "_curses_panel", "_datetime", "_dbm",
    "_decimal", "_elementtree", "_frozen_importlib", "_frozen_importlib_external", "_functools",
    "_gdbm", "_hashlib", "_heapq", "_imp", "_interpchannels", "_interpqueues", "_interpreters",
    "_io", "_ios_support", "_json", "_locale", "_lsprof", "_lzma", "_markupbase", "_md5", "_msi",
    "_multibytecodec", "_multiprocessing", "_opcode", "_opcode_metadata", "_operator",
    "_osx_support", "_overlapped", "_pickle", "_posixshmem", "_posixsubprocess", "_py_abc",
    "_pydatetime", "_pydecimal", "_pyio", "_pylong", "_pyrepl", "_queue", "_random", "_scproxy",
    "_sha1", "_sha2", "_sha256", "_sha3", "_sha512", "_signal", "_sitebuiltins", "_socket",
    "_sqlite3", "_sre", "_ssl", "_stat", "_statistics", "_string", "_strptime", "_struct",
    "_suggestions", "_symtable", "_sysconfig", "_thread", "_threading_local", "_tkinter",
    "_tokenize", "_tracemalloc", "_typing", "_uuid", "_warnings", "_weakref", "_weakrefset",
    "_winapi", "_wmi", "_zoneinfo", "abc", "aifc", "antigravity", "argparse", "array", "ast",
    "asynchat", "asyncio", "asyncore", "atexit", "audioop", "base64", "bdb", "binascii", "binhex",
    "bisect", "builtins", "bz2", "cProfile", "calendar", "cgi", "cgitb", "chunk", "cmath", "cmd",
    "code", "codecs", "codeop", "collections", "colorsys", "compileall", "concurrent",
    "configparser", "contextlib", "contextvars", "copy", "copyreg", "crypt", "csv", "ctypes",
    "curses", "dataclasses", "datetime", "dbm", "decimal", "difflib", "dis", "distutils",
    "doctest", "email", "encodings", "ensurepip", "enum", "errno", "faulthandler", "fcntl",
    "filecmp", "fileinput", "fnmatch", "fractions", "ftplib", "functools", "gc", "genericpath",
    "getopt", "getpass", "gettext", "glob", "graphlib", "grp", "gzip", "hashlib", "heapq", "hmac",
    "html", "http", "idlelib", "imaplib", "imghdr", "imp", "importlib", "inspect", "io",
    "ipaddress", "itertools", "json", "keyword", "lib2to3", "linecache", "locale", "logging",
    "lzma", "mailbox", "mailcap", "marshal", "math", "mimetypes", "mmap", "modulefinder",
    "msilib", "msvcrt", "multiprocessing", "netrc", "nis", "nntplib", "nt", "ntpath",
    "nturl2path", "numbers", "opcode", "operator", "optparse", "os", "ossaudiodev", "pathlib",
    "pdb", "pickle", "pickletools", "pipes", "pkgutil", "platform", "plistlib", "poplib", "posix",
    "posixpath", "pprint", "profile", "pstats", "pty", "pwd", "py_compile", "pyclbr", "pydoc",
    "pydoc_data", "pyexpat", "queue", "quopri", "random", "re", "readline", "reprlib", "resource",
    "rlcompleter", "runpy", "sched", "secrets", "select", "selectors", "shelve", "shlex", "shutil",
    "signal", "site", "smtpd", "smtplib", "sndhdr", "socket", "socketserver", "spwd", "sqlite3",
    "sre_compile", "sre_constants", "sre_parse", "ssl", "stat", "statistics", "string",
    "stringprep", "struct", "subprocess", "sunau", "symtable", "sys", "sysconfig", "syslog",
    "tabnanny", "tarfile", "telnetlib", "tempfile", "termios", "textwrap", "this", "threading",
    "time", "timeit", "tkinter", "token", "tokenize", "tomllib", "trace", "traceback",
    "tracemalloc", "tty", "turtle", "turtledemo", "types", "typing", "unicodedata", "unittest",
    "urllib", "uu", "uuid", "venv", "warnings", "wave", "weakref", "webbrowser", "winreg",
    "winsound", "wsgiref", "xdrlib", "xml", "xmlrpc", "zipapp", "zipfile", "zipimport", "zlib",
    "zoneinfo",
];

static SEARCH_PATHS: Lazy<Mutex<HashMap<String, Vec<PathBuf>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Whether `module` is a top-level standard-library name
pub fn is_stdlib(module: &str) -> bool {
    PYTHON_STDLIB.binary_search(&module).is_ok()
}

/// The interpreter's `sys.path`, queried once per interpreter and cached.
/// An interpreter that cannot be run yields no paths.
pub fn interpreter_search_paths(interpreter: &str) -> Vec<PathBuf> {
    if interpreter.is_empty() {
        return Vec::new();
    }
    let mut cache = match SEARCH_PATHS.lock() {
        Ok(cache) => cache,
        Err(poisoned) => poisoned.into_inner(),
    };
    cache
        .entry(interpreter.to_string())
        .or_insert_with(|| query_sys_path(interpreter))
        .clone()
}

fn query_sys_path(interpreter: &str) -> Vec<PathBuf> {
    let output = Command::new(interpreter)
        .args(["-c", "import sys; print('\\n'.join(sys.path))"])
        .output();
    match output {
        Ok(output) if output.status.success() => {
            let paths: Vec<PathBuf> = String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .filter(|path| path.is_dir())
                .collect();
            debug!("{} reports {} search paths", interpreter, paths.len());
            paths
        }
        Ok(output) => {
            debug!("{} exited with {}", interpreter, output.status);
            Vec::new()
        }
        Err(e) => {
            debug!("Could not run {}: {}", interpreter, e);
            Vec::new()
        }
    }
}

/// Site-packages directories of the active virtualenv, if any
pub fn virtualenv_site_packages() -> Vec<PathBuf> {
    let Some(venv) = std::env::var_os("VIRTUAL_ENV").map(PathBuf::from) else {
        return Vec::new();
    };
    let mut roots = vec![venv.join("Lib").join("site-packages")];
    if let Ok(entries) = std::fs::read_dir(venv.join("lib")) {
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with("python") {
                roots.push(entry.path().join("site-packages"));
            }
        }
    }
    roots
}

/// Whether `root` holds a package, a source module or an extension module
/// named `module`
pub fn module_in(root: &Path, module: &str) -> bool {
    if root.join(module).is_dir() || root.join(format!("{}.py", module)).is_file() {
        return true;
    }
    let prefix = format!("{}.", module);
    std::fs::read_dir(root)
        .map(|entries| {
            entries.flatten().any(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.starts_with(&prefix) && (name.ends_with(".so") || name.ends_with(".pyd"))
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdlib_table_is_sorted() {
        assert!(PYTHON_STDLIB.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_stdlib_names() {
        for name in ["codecs", "zoneinfo", "locale", "atexit", "binascii", "sysconfig", "tomllib", "numbers"] {
            assert!(is_stdlib(name), "{} should be stdlib", name);
        }
        assert!(!is_stdlib("numpy"));
        assert!(!is_stdlib("requests"));
    }

    #[test]
    fn test_missing_interpreter_yields_nothing() {
        assert!(interpreter_search_paths("").is_empty());
        assert!(interpreter_search_paths("surely-not-a-python-xyz").is_empty());
    }

    #[test]
    fn test_module_in() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("single.py"), "").unwrap();
        std::fs::write(dir.path().join("_speedups.cpython-312-x86_64-linux-gnu.so"), "").unwrap();

        assert!(module_in(dir.path(), "pkg"));
        assert!(module_in(dir.path(), "single"));
        assert!(module_in(dir.path(), "_speedups"));
        assert!(!module_in(dir.path(), "absent"));
    }
}
