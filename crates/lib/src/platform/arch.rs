use std::fmt;

/// CPU architecture variants wheelhouse knows how to build on or for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
  X86_64,
  X86,
  Aarch64,
  Armv7,
  Powerpc64,
  Powerpc64le,
  S390x,
}

impl Arch {
  pub fn current() -> Option<Self> {
    match std::env::consts::ARCH {
      "x86_64" => Some(Self::X86_64),
      "x86" => Some(Self::X86),
      "aarch64" => Some(Self::Aarch64),
      "arm" => Some(Self::Armv7),
      "powerpc64" if cfg!(target_endian = "little") => Some(Self::Powerpc64le),
      "powerpc64" => Some(Self::Powerpc64),
      "s390x" => Some(Self::S390x),
      _ => None,
    }
  }

  /// Parse the architecture component of a target triple or a common alias.
  pub fn parse(name: &str) -> Option<Self> {
    match name {
      "x86_64" | "x64" | "amd64" => Some(Self::X86_64),
      "i686" | "i586" | "i386" | "x86" => Some(Self::X86),
      "aarch64" | "arm64" => Some(Self::Aarch64),
      "armv7" | "armv7l" | "arm" => Some(Self::Armv7),
      "powerpc64" | "ppc64" => Some(Self::Powerpc64),
      "powerpc64le" | "ppc64le" => Some(Self::Powerpc64le),
      "s390x" => Some(Self::S390x),
      _ => None,
    }
  }

  /// Returns the identifier used in target triples and container matrices
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64",
      Self::X86 => "i686",
      Self::Aarch64 => "aarch64",
      Self::Armv7 => "armv7",
      Self::Powerpc64 => "powerpc64",
      Self::Powerpc64le => "powerpc64le",
      Self::S390x => "s390x",
    }
  }

  /// Whether this is one of the x86 family (32 or 64 bit)
  pub fn is_x86_family(&self) -> bool {
    matches!(self, Self::X86_64 | Self::X86)
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
