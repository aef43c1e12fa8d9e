use std::io::{self, Write};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};

/// Prints a `[[users]]` block for the server config.
///
/// Usage: `hash_password <username> <email> [role]`, password read from stdin.
fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let (Some(username), Some(email)) = (args.next(), args.next()) else {
        eprintln!("usage: hash_password <username> <email> [role]");
        std::process::exit(2);
    };
    let role = args.next().unwrap_or_else(|| "user".to_string());

    eprint!("Enter password: ");
    io::stderr().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;
    let password = password.trim();

    if password.is_empty() {
        eprintln!("Password cannot be empty");
        std::process::exit(1);
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    println!("[[users]]");
    println!("username = {username:?}");
    println!("email = {email:?}");
    println!("role = {role:?}");
    println!("password_hash = \"{hash}\"");
    Ok(())
}
