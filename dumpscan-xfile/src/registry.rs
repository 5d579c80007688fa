//! Open streams by `TYPE:name` specification.
//!
//! Built-in types are `file:<path>`, `fd:<number>` and `mem:` (an empty
//! memory buffer). A specification without a colon, or whose part before
//! the first colon is not a registered type, is a plain path.
//! Further types can be added with [`register_xfile_type`].

use std::collections::HashMap;
use std::sync::Mutex;

use lazy_static::lazy_static;

use crate::{open_fd, open_memory, open_path, OpenMode, XFile, XFileError};

/// Constructor for a registered stream type, called with the part after
/// the colon.
pub type XFileOpener = fn(OpenMode, &str) -> Result<XFile, XFileError>;

fn open_file_type(mode: OpenMode, name: &str) -> Result<XFile, XFileError> {
    if name.is_empty() {
        return Err(XFileError::InvalidArgs("missing file name".to_string()));
    }
    open_path(name, mode)
}

fn open_fd_type(mode: OpenMode, name: &str) -> Result<XFile, XFileError> {
    let fd = name
        .parse::<i32>()
        .map_err(|err| XFileError::InvalidArgs(format!("bad file descriptor '{}' - {}", name, err)))?;
    if fd < 0 {
        return Err(XFileError::InvalidArgs(format!("bad file descriptor '{}'", name)));
    }
    Ok(open_fd(fd, mode))
}

fn open_mem_type(mode: OpenMode, name: &str) -> Result<XFile, XFileError> {
    if !name.is_empty() {
        return Err(XFileError::InvalidArgs(format!(
            "memory xfile takes no name (got '{}')",
            name
        )));
    }
    Ok(open_memory(Vec::new(), mode))
}

lazy_static! {
    static ref XFILE_TYPES: Mutex<HashMap<String, XFileOpener>> = {
        let mut map: HashMap<String, XFileOpener> = HashMap::new();
        map.insert("file".to_string(), open_file_type);
        map.insert("fd".to_string(), open_fd_type);
        map.insert("mem".to_string(), open_mem_type);
        Mutex::new(map)
    };
}

/// Register (or replace) a stream type.
pub fn register_xfile_type(name: &str, opener: XFileOpener) -> Result<(), XFileError> {
    if name.is_empty() || name.contains(':') {
        return Err(XFileError::InvalidArgs(format!(
            "invalid xfile type name '{}'",
            name
        )));
    }
    let mut types = XFILE_TYPES.lock().unwrap_or_else(|err| err.into_inner());
    if types.insert(name.to_string(), opener).is_some() {
        log::debug!("replaced xfile type '{}'", name);
    }
    Ok(())
}

/// Open a stream from a `TYPE:name` specification.
///
/// If `TYPE` is not registered the whole specification is opened as path,
/// so `dir/vol:1.dump` works. [`XFileError::UnknownType`] is only returned
/// when no such file exists either.
pub fn open(mode: OpenMode, spec: &str) -> Result<XFile, XFileError> {
    let (kind, name) = match spec.split_once(':') {
        Some(parts) => parts,
        None => return open_path(spec, mode),
    };

    let opener = {
        let types = XFILE_TYPES.lock().unwrap_or_else(|err| err.into_inner());
        types.get(kind).copied()
    };

    match opener {
        Some(opener) => opener(mode, name),
        None => open_path(spec, mode).map_err(|err| match err {
            XFileError::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                XFileError::UnknownType(kind.to_string())
            }
            err => err,
        }),
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use anyhow::Error;

    use super::*;

    fn open_hello(mode: OpenMode, name: &str) -> Result<XFile, XFileError> {
        Ok(open_memory(format!("hello {}", name).into_bytes(), mode))
    }

    #[test]
    fn test_builtin_types() -> Result<(), Error> {
        let mut xf = open(OpenMode::ReadWrite, "mem:")?;
        xf.write(b"abc")?;
        assert_eq!(xf.contents(), Some(&b"abc"[..]));

        assert!(matches!(
            open(OpenMode::ReadOnly, "mem:junk"),
            Err(XFileError::InvalidArgs(_))
        ));
        assert!(matches!(
            open(OpenMode::ReadOnly, "fd:-3"),
            Err(XFileError::InvalidArgs(_))
        ));
        assert!(matches!(
            open(OpenMode::ReadOnly, "nosuchtype:foo"),
            Err(XFileError::UnknownType(kind)) if kind == "nosuchtype"
        ));
        Ok(())
    }

    #[test]
    fn test_register_type() -> Result<(), Error> {
        register_xfile_type("hello", open_hello)?;
        let mut xf = open(OpenMode::ReadOnly, "hello:world")?;
        let mut buf = [0u8; 11];
        xf.read(&mut buf)?;
        assert_eq!(&buf, b"hello world");

        assert!(register_xfile_type("bad:name", open_hello).is_err());
        Ok(())
    }

    #[test]
    fn test_unregistered_prefix_is_path() -> Result<(), Error> {
        let mut path = PathBuf::from("./target/testout");
        path.push(std::module_path!());
        std::fs::create_dir_all(&path)?;
        path.push("vol:1.dump");
        std::fs::write(&path, b"dumpdata")?;

        let spec = path.to_string_lossy().into_owned();
        assert!(spec.split_once(':').is_some());

        let mut xf = open(OpenMode::ReadOnly, &spec)?;
        let mut buf = [0u8; 8];
        xf.read(&mut buf)?;
        assert_eq!(&buf, b"dumpdata");

        // registered types still win
        let xf = open(OpenMode::ReadWrite, "mem:")?;
        assert_eq!(xf.contents(), Some(&b""[..]));
        Ok(())
    }
}
