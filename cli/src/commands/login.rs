//! `rosforge login` command.
//!
//! Saves registry credentials used when a registry's password variable
//! is not set for a run.

use std::io::BufRead;

use clap::Args;
use rosforge_runtime::CredentialStore;

#[derive(Args)]
pub struct LoginArgs {
    /// Registry server (default: docker.io)
    pub server: Option<String>,

    /// Username
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password
    #[arg(short, long)]
    pub password: Option<String>,

    /// Read password from stdin
    #[arg(long)]
    pub password_stdin: bool,
}

pub async fn execute(args: LoginArgs) -> Result<(), Box<dyn std::error::Error>> {
    let server = args.server.unwrap_or_else(|| "docker.io".to_string());
    let mut stdin = std::io::stdin().lock();

    let username = match args.username {
        Some(u) => u,
        None => prompt(&mut stdin, "Username: ")?,
    };
    let password = match (args.password_stdin, args.password) {
        (true, _) => read_line(&mut stdin)?,
        (false, Some(p)) => p,
        (false, None) => prompt(&mut stdin, "Password: ")?,
    };

    if username.is_empty() || password.is_empty() {
        return Err("Username and password are required".into());
    }

    CredentialStore::default_path()?.store(&server, &username, &password)?;
    tracing::info!(registry = %server, username = %username, "Stored registry credentials");

    println!("Login Succeeded");
    Ok(())
}

fn prompt(input: &mut impl BufRead, label: &str) -> std::io::Result<String> {
    eprint!("{}", label);
    read_line(input)
}

fn read_line(input: &mut impl BufRead) -> std::io::Result<String> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}
