//! Pre-launch vetting of plugin executables.
//!
//! [`SecurityValidator::validate`] runs a fixed sequence of checks and stops
//! at the first failure:
//!
//! 1. filesystem posture (execute bit, writable bits, parent directory, owner)
//! 2. SHA-256 checksum against the manifest
//! 3. homepage against the trusted-source list (advisory)
//! 4. native executable header
//! 5. declared capabilities against the host policy
//!
//! The validator only reads the file. Calling it twice on the same file
//! gives the same answer.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::capabilities::CapabilityValidator;
use crate::config::HostConfig;
use crate::error::{PluginError, PluginResult, ValidationStep};
use crate::manifest::PluginManifest;

/// Recognized native executable formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    /// Linux / BSD ELF.
    Elf,
    /// Mach-O, 32 or 64 bit, either byte order.
    MachO,
    /// Mach-O universal binary.
    MachOFat,
    /// Windows PE (`MZ`).
    Pe,
}

impl BinaryFormat {
    /// Identify a format from the first bytes of a file.
    #[must_use]
    pub fn sniff(header: &[u8]) -> Option<Self> {
        match header {
            [0x7F, b'E', b'L', b'F', ..] => Some(Self::Elf),
            [0xFE, 0xED, 0xFA, 0xCE | 0xCF, ..] | [0xCE | 0xCF, 0xFA, 0xED, 0xFE, ..] => {
                Some(Self::MachO)
            },
            [0xCA, 0xFE, 0xBA, 0xBE, ..] => Some(Self::MachOFat),
            [b'M', b'Z', ..] => Some(Self::Pe),
            _ => None,
        }
    }
}

/// What the validator learned about an accepted executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// The validated file.
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the file.
    pub checksum: String,
    /// Detected executable format.
    pub format: BinaryFormat,
    /// Advisory findings that did not block loading.
    pub warnings: Vec<String>,
}

/// Runs the pre-launch checks.
#[derive(Debug, Clone, Default)]
pub struct SecurityValidator {
    trusted_sources: Vec<String>,
    capabilities: CapabilityValidator,
}

impl SecurityValidator {
    /// Build a validator from host configuration.
    #[must_use]
    pub fn new(config: &HostConfig) -> Self {
        Self {
            trusted_sources: config.security.trusted_sources.clone(),
            capabilities: CapabilityValidator::new(config.capabilities.clone()),
        }
    }

    /// The capability validator used for step 5.
    #[must_use]
    pub fn capabilities(&self) -> &CapabilityValidator {
        &self.capabilities
    }

    /// Vet an executable, optionally against its manifest.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Validation`] naming the failed step and the
    /// literal reason.
    pub fn validate(
        &self,
        path: &Path,
        manifest: Option<&PluginManifest>,
    ) -> PluginResult<ValidationReport> {
        let mut warnings = Vec::new();

        check_permissions(path)?;
        check_ownership(path)?;

        let checksum = sha256_file(path)
            .map_err(|e| PluginError::validation(path, ValidationStep::Io, e.to_string()))?;
        if let Some(expected) = manifest.and_then(PluginManifest::checksum) {
            verify_checksum(path, expected, &checksum)?;
        }

        if let Some(manifest) = manifest {
            self.check_trust(manifest, &mut warnings);
            check_executable_name(path, manifest, &mut warnings);
        }

        let format = sniff_file(path)?;

        if let Some(manifest) = manifest {
            let found = self
                .capabilities
                .validate(&manifest.spec.capabilities)
                .map_err(|v| {
                    PluginError::validation(path, ValidationStep::Capabilities, v.to_string())
                })?;
            warnings.extend(found);
        }

        for warning in &warnings {
            warn!(path = %path.display(), "{warning}");
        }
        debug!(path = %path.display(), checksum = %checksum, ?format, "plugin executable validated");

        Ok(ValidationReport {
            path: path.to_path_buf(),
            checksum,
            format,
            warnings,
        })
    }

    fn check_trust(&self, manifest: &PluginManifest, warnings: &mut Vec<String>) {
        if self.trusted_sources.is_empty() {
            return;
        }
        let Some(homepage) = manifest.homepage() else {
            return;
        };
        let host = match url::Url::parse(homepage) {
            Ok(url) => url.host_str().map(str::to_ascii_lowercase),
            Err(e) => {
                warnings.push(format!("homepage '{homepage}' is not a valid URL: {e}"));
                return;
            },
        };
        let trusted = host
            .as_deref()
            .is_some_and(|host| self.trusted_sources.iter().any(|t| host_matches(host, t)));
        if !trusted {
            warnings.push(format!(
                "homepage '{homepage}' is not from a trusted source"
            ));
        }
    }
}

/// Whether `host` equals or is a subdomain of a trusted entry.
///
/// Entries may be bare hosts (`github.com`) or URLs.
fn host_matches(host: &str, trusted: &str) -> bool {
    let trusted = url::Url::parse(trusted)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_else(|| trusted.trim().to_ascii_lowercase());
    host == trusted
        || host
            .strip_suffix(trusted.as_str())
            .is_some_and(|rest| rest.ends_with('.'))
}

#[cfg(unix)]
fn check_permissions(path: &Path) -> PluginResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path)
        .map_err(|e| PluginError::validation(path, ValidationStep::Io, e.to_string()))?;
    if !meta.is_file() {
        return Err(PluginError::validation(
            path,
            ValidationStep::Permissions,
            "not a regular file",
        ));
    }

    let mode = meta.permissions().mode() & 0o7777;
    if mode & 0o111 == 0 {
        return Err(PluginError::validation(
            path,
            ValidationStep::Permissions,
            format!("file is not executable (mode {mode:04o})"),
        ));
    }
    if mode & 0o022 != 0 {
        return Err(PluginError::validation(
            path,
            ValidationStep::Permissions,
            format!("file is writable by group or others (mode {mode:04o})"),
        ));
    }

    let dir = parent_dir(path);
    let dir_meta = std::fs::metadata(&dir)
        .map_err(|e| PluginError::validation(path, ValidationStep::Io, e.to_string()))?;
    let dir_mode = dir_meta.permissions().mode() & 0o7777;
    if dir_mode & 0o002 != 0 {
        return Err(PluginError::validation(
            path,
            ValidationStep::Permissions,
            format!(
                "directory {} is world-writable (mode {dir_mode:04o})",
                dir.display()
            ),
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(path: &Path) -> PluginResult<()> {
    let meta = std::fs::metadata(path)
        .map_err(|e| PluginError::validation(path, ValidationStep::Io, e.to_string()))?;
    if meta.is_file() {
        Ok(())
    } else {
        Err(PluginError::validation(
            path,
            ValidationStep::Permissions,
            "not a regular file",
        ))
    }
}

/// The file must belong to root or to the user running the host.
#[cfg(unix)]
fn check_ownership(path: &Path) -> PluginResult<()> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::metadata(path)
        .map_err(|e| PluginError::validation(path, ValidationStep::Io, e.to_string()))?;
    let owner = meta.uid();
    let euid = nix::unistd::geteuid().as_raw();
    if owner == 0 || owner == euid {
        Ok(())
    } else {
        Err(PluginError::validation(
            path,
            ValidationStep::Ownership,
            format!("file is owned by uid {owner}, expected root or uid {euid}"),
        ))
    }
}

#[cfg(not(unix))]
fn check_ownership(_path: &Path) -> PluginResult<()> {
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Lowercase hex SHA-256 of a file, streamed.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn verify_checksum(path: &Path, declared: &str, actual: &str) -> PluginResult<()> {
    let expected = match declared.split_once(':') {
        Some((algo, digest)) if algo.eq_ignore_ascii_case("sha256") => digest.trim(),
        Some((algo, _)) => {
            return Err(PluginError::validation(
                path,
                ValidationStep::Checksum,
                format!("unsupported checksum algorithm '{algo}'"),
            ));
        },
        None => declared,
    }
    .to_ascii_lowercase();

    if expected == actual {
        Ok(())
    } else {
        Err(PluginError::validation(
            path,
            ValidationStep::Checksum,
            format!("checksum mismatch: expected {expected}, got {actual}"),
        ))
    }
}

fn check_executable_name(path: &Path, manifest: &PluginManifest, warnings: &mut Vec<String>) {
    let declared = manifest.spec.executable.name.as_str();
    if declared.is_empty() {
        return;
    }
    let actual = path.file_name().map(|n| n.to_string_lossy());
    if actual.as_deref() != Some(declared) {
        warnings.push(format!(
            "manifest declares executable '{declared}' but loading '{}'",
            path.display()
        ));
    }
}

fn sniff_file(path: &Path) -> PluginResult<BinaryFormat> {
    let mut header = Vec::with_capacity(4);
    File::open(path)
        .and_then(|f| f.take(4).read_to_end(&mut header))
        .map_err(|e| PluginError::validation(path, ValidationStep::Io, e.to_string()))?;

    BinaryFormat::sniff(&header).ok_or_else(|| {
        let reason = if header.starts_with(b"#!") {
            "script files are not accepted; expected a native executable".to_string()
        } else {
            format!(
                "unrecognized executable header {}",
                hex::encode(&header)
            )
        };
        PluginError::validation(path, ValidationStep::Format, reason)
    })
}
