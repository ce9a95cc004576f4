use std::process::Command;

/// Run a command and return its trimmed stdout, or `None` on failure.
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|s| !s.is_empty())
}

fn main() {
    let git_hash = std::env::var("PERSONA_GIT_HASH")
        .ok()
        .or_else(|| command_output("git", &["rev-parse", "--short", "HEAD"]))
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=PERSONA_GIT_HASH={}", git_hash);

    let build_date = command_output("date", &["-u", "+%Y-%m-%d"])
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=PERSONA_BUILD_DATE={}", build_date);

    println!("cargo:rerun-if-env-changed=PERSONA_GIT_HASH");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
}
