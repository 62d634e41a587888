use wheelhouse_lib::consts::{BUILD_TOOL, BUILD_TOOL_RELEASES};
use wheelhouse_lib::env::EnvironmentSet;
use wheelhouse_lib::platform::paths::{cache_dir, temp_dir};
use wheelhouse_lib::platform::Platform;

use crate::output::{print_error, print_stat};

pub fn cmd_info() {
  println!("System:");
  match Platform::current() {
    Some(platform) => print_stat("Platform", &platform.to_string()),
    None => {
      print_error("Could not detect platform.");
      return;
    }
  }

  let env = EnvironmentSet::from_process();
  print_stat("Cache", &cache_dir(&env).display().to_string());
  print_stat("Temp", &temp_dir(&env).display().to_string());
  print_stat("Build tool", &format!("{} ({})", BUILD_TOOL, BUILD_TOOL_RELEASES));
}
