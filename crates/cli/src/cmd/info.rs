use kiln_lib::platform::{paths, platform_triple};

pub fn cmd_info() {
  println!("System:");
  match platform_triple() {
    Some(triple) => println!("Platform: {}", triple),
    _ => println!("Could not detect platform."),
  }
  println!();
  println!("Directories:");
  println!("Data: {}", paths::data_dir().display());
  println!("Cache: {}", paths::downloads_dir().display());
  println!("Work: {}", paths::work_dir().display());
}
