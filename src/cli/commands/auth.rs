use clap::{Arg, Command};

pub fn with_args(command: Command) -> Command {
    let command = with_app_args(command);
    let command = with_session_args(command);
    with_verification_args(command)
}

fn with_app_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL used for email links and CORS origin")
                .env("ENIRO_FRONTEND_BASE_URL")
                .default_value("https://eniro.dev"),
        )
        .arg(
            Arg::new("app-key")
                .long("app-key")
                .help("Application key for URL signing and at-rest encryption")
                .env("ENIRO_APP_KEY")
                .required(true),
        )
        .arg(
            Arg::new("totp-issuer")
                .long("totp-issuer")
                .help("Issuer label shown in authenticator apps")
                .env("ENIRO_TOTP_ISSUER")
                .default_value("Eniro"),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session cookie TTL in seconds")
                .env("ENIRO_SESSION_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("remember-ttl-seconds")
                .long("remember-ttl-seconds")
                .help("Session TTL in seconds when remember is requested")
                .env("ENIRO_REMEMBER_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("challenge-ttl-seconds")
                .long("challenge-ttl-seconds")
                .help("Two-factor challenge session TTL in seconds")
                .env("ENIRO_CHALLENGE_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("password-confirm-ttl-seconds")
                .long("password-confirm-ttl-seconds")
                .help("Window during which a password confirmation stays fresh")
                .env("ENIRO_PASSWORD_CONFIRM_TTL_SECONDS")
                .default_value("10800")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_verification_args(command: Command) -> Command {
    command.arg(
        Arg::new("verification-ttl-minutes")
            .long("verification-ttl-minutes")
            .help("Email verification link TTL in minutes")
            .env("ENIRO_VERIFICATION_TTL_MINUTES")
            .default_value("60")
            .value_parser(clap::value_parser!(i64)),
    )
}
