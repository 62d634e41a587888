//! Host platform detection.

pub mod arch;
pub mod os;
pub mod paths;

use std::fmt;

use arch::Arch;
use os::Os;

/// The machine wheelhouse itself runs on, as opposed to the build target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
}

impl Platform {
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// `None` when either the OS or the CPU is not one wheelhouse can drive.
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  pub fn is_linux(&self) -> bool {
    self.os == Os::Linux
  }

  pub fn is_macos(&self) -> bool {
    self.os == Os::MacOs
  }

  /// Short `arch-os` name used in logs and error messages, e.g. `aarch64-darwin`.
  pub fn triple(&self) -> String {
    format!("{}-{}", self.arch, self.os)
  }

  /// Prebuilt binaries are only published for x86_64 and aarch64; everything
  /// else falls back to the x86_64 build.
  pub fn release_arch(&self) -> Arch {
    match self.arch {
      Arch::Aarch64 => Arch::Aarch64,
      _ => Arch::X86_64,
    }
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.triple())
  }
}
