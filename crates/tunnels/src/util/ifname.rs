//! Interface name utilities.

use crate::error::{Error, Result};

/// Maximum interface name length (including null terminator).
pub const IFNAMSIZ: usize = 16;

/// Validate a kernel interface name.
///
/// An empty name is accepted: the kernel picks one (`tun0`, `tun1`, ...).
pub fn validate(name: &str) -> Result<()> {
    if name.len() >= IFNAMSIZ {
        return Err(Error::NameTooLong {
            name: name.to_string(),
            len: name.len(),
            max: IFNAMSIZ - 1,
        });
    }

    if name.contains('/') || name.contains('\0') {
        return Err(Error::InvalidName(format!(
            "{:?} contains invalid characters",
            name
        )));
    }

    if name.chars().any(|c| c.is_whitespace()) {
        return Err(Error::InvalidName(format!("{:?} contains whitespace", name)));
    }

    Ok(())
}

/// Encode a name into the NUL-padded 16-byte field that leads every
/// `ifreq` request.
pub fn to_ifreq_name(name: &str) -> Result<[u8; IFNAMSIZ]> {
    validate(name)?;
    let mut out = [0u8; IFNAMSIZ];
    out[..name.len()].copy_from_slice(name.as_bytes());
    Ok(out)
}

/// Decode the name field of an `ifreq` request.
pub fn from_ifreq_name(raw: &[u8; IFNAMSIZ]) -> String {
    let len = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..len]).into_owned()
}

/// Convert an interface name to its kernel index.
#[cfg(unix)]
pub fn name_to_index(name: &str) -> Result<u32> {
    validate(name)?;
    let cname = std::ffi::CString::new(name).map_err(|_| Error::InvalidName(name.to_string()))?;

    // SAFETY: cname is a valid NUL-terminated string for the duration of the call.
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(index)
}
