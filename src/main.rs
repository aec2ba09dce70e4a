use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use log::{debug, error, LevelFilter};
use structopt::StructOpt;
use tokio::io::AsyncReadExt;

use sendmail_relay::config::{split_host_port, DEFAULT_CONFIG_FILE};
use sendmail_relay::{
    AccountDirectory, ClientId, ClientSecurity, Credentials, DeadLetter, Error, Mechanism,
    MessageBuilder, Recipients, Response, ReverseAlias, Rewriter, SenderPolicy, Settings,
    SmtpClient, SystemAccounts, TlsSettings,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "sendmail-relay",
    about = "Relays one message from standard input to an SMTP mailhub"
)]
struct Opt {
    /// Read recipients from the To, Cc and Bcc headers
    #[structopt(short = "t")]
    read_headers: bool,

    /// Sender address (-r is accepted as well)
    #[structopt(short = "f", long = "from", number_of_values = 1)]
    from: Option<String>,

    /// Full name of the sender
    #[structopt(short = "F", long = "full-name", number_of_values = 1)]
    full_name: Option<String>,

    /// Configuration file
    #[structopt(short = "C", long = "config", parse(from_os_str))]
    config: Option<PathBuf>,

    /// Show the SMTP conversation
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,

    /// Same as -v
    #[structopt(short = "d")]
    debug: bool,

    /// Accepted for compatibility, a lone dot never ends the input
    #[structopt(short = "i")]
    ignore_dots: bool,

    /// sendmail options (-oi, -ov, -oem, ...)
    #[structopt(short = "o", number_of_values = 1)]
    options: Vec<String>,

    /// sendmail operation mode (-bm, -bp, -bi, ...)
    #[structopt(short = "b", number_of_values = 1)]
    mode: Vec<String>,

    /// User to authenticate as (-au)
    #[structopt(long = "auth-user", number_of_values = 1)]
    auth_user: Option<String>,

    /// Password (-ap)
    #[structopt(long = "auth-pass", number_of_values = 1)]
    auth_pass: Option<String>,

    /// LOGIN or CRAM-MD5 (-am)
    #[structopt(long = "auth-method", number_of_values = 1)]
    auth_method: Option<String>,

    /// Mailhub as host[:port], overriding the configuration
    #[structopt(long = "mailhub", number_of_values = 1)]
    mailhub: Option<String>,

    /// Recipients, each possibly a comma separated list
    recipients: Vec<String>,
}

impl Opt {
    fn verbose(&self) -> bool {
        self.verbose || self.debug || self.options.iter().any(|o| o == "v")
    }
}

/// Rewrites sendmail's multi-letter flags into forms the parser knows
fn normalize_args<I: IntoIterator<Item = String>>(args: I) -> Vec<String> {
    const RENAMED: [(&str, &str); 4] = [
        ("-au", "--auth-user"),
        ("-ap", "--auth-pass"),
        ("-am", "--auth-method"),
        ("-I", "--mailhub"),
    ];

    let mut args = args.into_iter();
    let mut normalized: Vec<String> = args.next().into_iter().collect();
    while let Some(arg) = args.next() {
        if arg == "--" {
            normalized.push(arg);
            normalized.extend(args.by_ref());
            break;
        }
        if !arg.starts_with('-') || arg.starts_with("--") {
            normalized.push(arg);
            continue;
        }

        if let Some(&(short, long)) = RENAMED.iter().find(|(short, _)| arg.starts_with(short)) {
            normalized.push(long.to_string());
            if arg.len() > short.len() {
                normalized.push(arg[short.len()..].to_string());
            }
            continue;
        }

        match arg.as_bytes().get(1) {
            Some(b'r') => normalized.push(format!("-f{}", &arg[2..])),
            Some(b'q') => normalized.push("-bp".to_string()),
            // sendmail flags taking a value that does not matter here
            Some(b'R') | Some(b'N') if arg.len() == 2 => {
                args.next();
            }
            Some(b'E') | Some(b'h') | Some(b'm') | Some(b'n') | Some(b'M') | Some(b'R')
            | Some(b'N') | Some(b'4') | Some(b'6') => {}
            _ => normalized.push(arg),
        }
    }
    normalized
}

/// Handles invocations that only print something, returning the exit code
fn informational(prog: &str, opt: &Opt) -> Option<i32> {
    let aliases = || println!("{}: Aliases are not used in sendmail-relay", prog);
    for mode in &opt.mode {
        match mode.as_str() {
            "m" => {}
            "p" => println!("{}: Mail queue is empty", prog),
            "i" => aliases(),
            other => eprintln!("-b{} is not supported by sendmail-relay", other),
        }
        if mode != "m" {
            return Some(0);
        }
    }
    for option in &opt.options {
        match option.as_str() {
            "D" => aliases(),
            "o" => eprintln!("-oo is not supported by sendmail-relay"),
            _ => continue,
        }
        return Some(0);
    }
    None
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Warn);
    if verbose {
        builder.filter_module("sendmail_relay", LevelFilter::Debug);
    }
    builder.parse_default_env();
    builder.init();
}

/// Loads the configuration and relays `input`
async fn relay(opt: &Opt, input: &[u8]) -> Result<Response, Error> {
    let config_path = opt
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut settings = Settings::load(&config_path).await?;
    let accounts = SystemAccounts;
    let account = accounts.current()?;

    let alias = ReverseAlias::load(&config_path, &account.name).await;
    if let Some(ReverseAlias {
        mailhub: Some(ref mailhub),
        port,
        ..
    }) = alias
    {
        settings.mailhub = mailhub.clone();
        if let Some(port) = port {
            settings.port = port;
        }
    }
    if let Some(ref mailhub) = opt.mailhub {
        let (host, port) = split_host_port(mailhub);
        settings.mailhub = host;
        if let Some(port) = port {
            settings.port = port;
        }
    }
    if opt.auth_user.is_some() {
        settings.auth_user = opt.auth_user.clone();
    }
    if opt.auth_pass.is_some() {
        settings.auth_pass = opt.auth_pass.clone();
    }
    if opt.auth_method.is_some() {
        settings.auth_method = opt.auth_method.clone();
    }

    let hello_name = settings
        .hostname
        .clone()
        .map(ClientId::new)
        .unwrap_or_default();
    let rewriter = Rewriter::new(hello_name.to_string())
        .rewrite_domain(settings.rewrite_domain.clone())
        .root(settings.root.clone())
        .uid_ceiling(settings.uid_ceiling);
    let policy = SenderPolicy {
        from_line_override: settings.from_line_override,
        forced_address: opt.from.clone(),
        full_name: opt.full_name.clone(),
        reverse_alias: alias.map(|alias| alias.address),
    };
    let recipients = if opt.read_headers {
        Recipients::FromHeaders
    } else {
        Recipients::Arguments(opt.recipients.clone())
    };
    let message = MessageBuilder::new(rewriter, &accounts)
        .policy(policy)
        .recipients(recipients)
        .build(input)?;

    let security = if settings.use_starttls {
        ClientSecurity::StartTls
    } else if settings.use_tls {
        ClientSecurity::Wrapper
    } else {
        ClientSecurity::None
    };
    let tls = TlsSettings {
        verify: settings.tls_verify,
        client_certificate: if settings.use_tls_cert {
            Some(settings.tls_cert.clone())
        } else {
            None
        },
    };
    let mut client = SmtpClient::new(settings.mailhub.clone(), settings.port)
        .hello_name(hello_name)
        .security(security)
        .tls_settings(tls)
        .timeouts(settings.timeouts);
    if let Some(user) = settings.auth_user.clone() {
        let mechanism = match settings.auth_method {
            Some(ref method) => method.parse()?,
            None => Mechanism::default(),
        };
        client = client
            .credentials(Credentials::new(
                user,
                settings.auth_pass.clone().unwrap_or_default(),
            ))
            .authentication_mechanism(mechanism);
    }

    client.into_transport().send(&message).await
}

/// Appends the input to `~/dead.letter`, unless it came from a terminal
async fn keep_dead_letter(input: &[u8]) {
    if std::io::stdin().is_terminal() {
        error!("stdin is a terminal, not saving to dead.letter");
        return;
    }
    match SystemAccounts.current() {
        Ok(account) => DeadLetter::new(&account.home).keep(input).await,
        Err(e) => error!("no home directory for dead.letter: {}", e),
    }
}

async fn run(prog: &str, opt: Opt) -> i32 {
    let mut input = Vec::new();
    if let Err(e) = tokio::io::stdin().read_to_end(&mut input).await {
        eprintln!("{}: reading message: {}", prog, e);
        return 1;
    }

    if opt.ignore_dots {
        debug!("a lone dot never ends the input");
    }
    match relay(&opt, &input).await {
        Ok(response) => {
            println!("{}: {}", prog, response);
            0
        }
        Err(e) => {
            if let Some(response) = e.response() {
                println!("{}: {}", prog, response);
            }
            eprintln!("{}: {}", prog, e);
            error!("{}", e);
            keep_dead_letter(&input).await;
            1
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args: Vec<String> = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    let prog = args
        .first()
        .and_then(|arg0| Path::new(arg0).file_name())
        .map_or_else(
            || "sendmail-relay".to_string(),
            |name| name.to_string_lossy().into_owned(),
        );

    match prog.as_str() {
        "mailq" => {
            println!("mailq: Mail queue is empty");
            process::exit(0);
        }
        "newaliases" => {
            println!("newaliases: Aliases are not used in sendmail-relay");
            process::exit(0);
        }
        _ => {}
    }

    let opt = Opt::from_iter(normalize_args(args));
    init_logging(opt.verbose());

    if let Some(code) = informational(&prog, &opt) {
        process::exit(code);
    }
    if opt.read_headers && !opt.recipients.is_empty() {
        eprintln!("{}: recipients with -t option not supported", prog);
        process::exit(1);
    }
    if !opt.read_headers && opt.recipients.is_empty() {
        eprintln!("{}: No recipients supplied - mail will not be sent", prog);
        process::exit(1);
    }

    process::exit(run(&prog, opt).await);
}
