// Command line layer: flag definitions, the run-time settings derived from
// them, and the linear pipeline that turns one invocation into one gist.
//
// Parse -> load credentials (skipped when anonymous) -> load files ->
// build request -> send -> print URL. Any failure ends the run.

use crate::api::{GistClient, GistRequest, GistResult, GistService, CREATE_TIMEOUT, DEFAULT_API_URL};
use crate::auth::{load_token, StaticToken, TokenLocation};
use crate::files::{load_files, load_reader, FileMap};
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgGroup, Command, CommandFactory, FromArgMatches, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that points the client at another API endpoint.
pub const API_URL_ENV: &str = "GIST_API_URL";

/// Upload local files to gist.github.com and print the new gist's URL.
///
/// The GitHub personal access token is read from $HOME/.github-gist-token
/// (or the file given with --token). It only needs the `gist` scope and the
/// file must not be readable by group or others.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "gist", version)]
#[command(group(ArgGroup::new("input").required(true).args(["files", "name"])))]
pub struct Cli {
    /// Files to upload; they are sent in name order
    #[arg(value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Read the content from standard input and upload it as NAME
    #[arg(short = 'f', long = "name", value_name = "NAME")]
    pub name: Option<String>,

    /// Description for the gist
    #[arg(short, long)]
    pub description: Option<String>,

    /// Create a public gist
    #[arg(short, long)]
    pub public: bool,

    /// Create the gist without credentials (implies --public)
    #[arg(short, long)]
    pub anonymous: bool,

    /// Read the access token from FILE instead of $HOME/.github-gist-token
    #[arg(short, long, value_name = "FILE")]
    pub token: Option<PathBuf>,
}

impl Cli {
    /// The clap command, with the version switch moved to `-v`.
    pub fn command_line() -> Command {
        <Cli as CommandFactory>::command()
            .disable_version_flag(true)
            .arg(
                Arg::new("version")
                    .short('v')
                    .long("version")
                    .action(ArgAction::Version)
                    .help("Print version and exit"),
            )
    }

    pub fn try_parse_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command_line().try_get_matches_from(args)?;
        Cli::from_arg_matches(&matches)
    }

    /// Parse the process arguments, exiting with usage (code 2) on error.
    pub fn parse_args() -> Self {
        match Self::try_parse_args(std::env::args_os()) {
            Ok(cli) => cli,
            Err(e) => e.exit(),
        }
    }
}

/// Run-time configuration threaded through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_url: String,
    pub token_path: Option<PathBuf>,
    pub anonymous: bool,
    pub timeout: Duration,
}

impl Settings {
    /// Build settings from the parsed flags and the environment variable
    /// `GIST_API_URL`, falling back to the public GitHub API.
    pub fn from_env(cli: &Cli) -> Self {
        let api_url = std::env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.into());
        Settings::new(cli, api_url)
    }

    pub fn new(cli: &Cli, api_url: impl Into<String>) -> Self {
        Settings {
            api_url: api_url.into(),
            token_path: cli.token.clone(),
            anonymous: cli.anonymous,
            timeout: CREATE_TIMEOUT,
        }
    }
}

/// Load the access token unless running anonymously.
pub fn load_credentials(settings: &Settings) -> Result<Option<StaticToken>> {
    if settings.anonymous {
        tracing::debug!("anonymous mode, not reading a token");
        return Ok(None);
    }
    let location = TokenLocation::resolve(settings.token_path.as_deref())?;
    let token = load_token(&location)?;
    Ok(Some(StaticToken::new(token)))
}

/// Read the input sources named by `cli` into a request.
pub fn build_request<R: Read>(cli: &Cli, stdin: R) -> Result<GistRequest> {
    let files: FileMap = match &cli.name {
        Some(name) => load_reader(name, stdin)?,
        None => load_files(&cli.files)?,
    };
    Ok(GistRequest {
        description: cli.description.clone(),
        public: cli.public || cli.anonymous,
        files,
    })
}

/// Connect to the real API using `token`, or anonymously when it is `None`.
pub fn connect(settings: &Settings, token: Option<StaticToken>) -> Result<Box<dyn GistService>> {
    let client = match token {
        Some(token) => GistClient::authenticated(&settings.api_url, Box::new(token))?,
        None => GistClient::anonymous(&settings.api_url)?,
    };
    Ok(Box::new(client.with_timeout(settings.timeout)))
}

/// Send the request and write the resulting URL, newline terminated, to `out`.
pub fn publish<W: Write>(service: &dyn GistService, req: GistRequest, out: &mut W) -> Result<GistResult> {
    // Drawn on stderr, and hidden when stderr is not a terminal.
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message("Creating gist...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = service.create(req);
    spinner.finish_and_clear();

    let gist = result?;
    writeln!(out, "{}", gist.url).context("write gist URL")?;
    Ok(gist)
}

/// The whole pipeline against the real API.
pub fn run<R: Read, W: Write>(cli: &Cli, settings: &Settings, stdin: R, out: &mut W) -> Result<GistResult> {
    run_with(cli, settings, stdin, out, |token| connect(settings, token))
}

/// The whole pipeline, obtaining the service from `connect` once the
/// credentials are known.
pub fn run_with<R, W, F>(cli: &Cli, settings: &Settings, stdin: R, out: &mut W, connect: F) -> Result<GistResult>
where
    R: Read,
    W: Write,
    F: FnOnce(Option<StaticToken>) -> Result<Box<dyn GistService>>,
{
    let token = load_credentials(settings)?;
    let req = build_request(cli, stdin)?;
    let service = connect(token)?;
    publish(service.as_ref(), req, out)
}

/// Exit status for the outcome of a run. Failures are written to `stderr`
/// as `gist: <error>` and map to 1.
pub fn exit_code<T, W: Write>(result: &Result<T>, stderr: &mut W) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => {
            let _ = writeln!(stderr, "gist: {:#}", e);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::auth::TokenSource;
    use crate::files::FileEntry;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Fake service that records requests and either succeeds or fails.
    #[derive(Clone, Default)]
    struct Recorder {
        seen: Rc<RefCell<Vec<GistRequest>>>,
        fail: bool,
    }

    impl GistService for Recorder {
        fn create(&self, req: GistRequest) -> Result<GistResult, ApiError> {
            self.seen.borrow_mut().push(req);
            if self.fail {
                return Err(ApiError::Status {
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    body: "unavailable".into(),
                });
            }
            Ok(GistResult {
                url: "https://gist.example/1".into(),
            })
        }
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_args(std::iter::once("gist").chain(args.iter().copied())).unwrap()
    }

    fn write_token(dir: &TempDir, mode: u32) -> PathBuf {
        let path = dir.path().join("token");
        std::fs::write(&path, "abc123\n  ").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        }
        #[cfg(not(unix))]
        let _ = mode;
        path
    }

    #[test]
    fn no_input_is_a_usage_error() {
        let err = Cli::try_parse_args(["gist", "-d", "desc"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn files_and_stdin_name_conflict() {
        let err = Cli::try_parse_args(["gist", "-f", "x.txt", "a.txt"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn version_flag_is_lowercase_v() {
        let err = Cli::try_parse_args(["gist", "-v"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        assert_eq!(err.exit_code(), 0);
    }

    #[test]
    fn flags_are_parsed() {
        let cli = parse(&["-d", "desc", "-p", "-t", "/tmp/tok", "a.txt", "b.txt"]);
        assert_eq!(cli.description.as_deref(), Some("desc"));
        assert!(cli.public);
        assert!(!cli.anonymous);
        assert_eq!(cli.token, Some(PathBuf::from("/tmp/tok")));
        assert_eq!(cli.files, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
        assert_eq!(cli.name, None);
    }

    #[test]
    fn anonymous_implies_public() {
        let cli = parse(&["-a", "-f", "x.txt"]);
        let req = build_request(&cli, "x".as_bytes()).unwrap();
        assert!(req.public);
    }

    #[test]
    fn stdin_mode_end_to_end() {
        let dir = TempDir::new().unwrap();
        let token = write_token(&dir, 0o600);
        let token_arg = token.to_string_lossy().into_owned();
        let cli = parse(&["-f", "a.txt", "-d", "desc", "-p", "-t", &token_arg]);
        let settings = Settings::new(&cli, "http://unused");

        let recorder = Recorder::default();
        let fake = recorder.clone();
        let mut out = Vec::new();
        let result = run_with(&cli, &settings, "hello".as_bytes(), &mut out, move |token| {
            assert_eq!(token.unwrap().access_token().unwrap(), "abc123");
            Ok(Box::new(fake))
        })
        .unwrap();

        assert_eq!(result.url, "https://gist.example/1");
        assert_eq!(String::from_utf8(out).unwrap(), "https://gist.example/1\n");

        let seen = recorder.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].description.as_deref(), Some("desc"));
        assert!(seen[0].public);
        assert_eq!(seen[0].files.len(), 1);
        assert_eq!(
            seen[0].files["a.txt"],
            FileEntry {
                filename: "a.txt".into(),
                content: "hello".into(),
            }
        );
    }

    #[test]
    fn positional_files_end_to_end() {
        let dir = TempDir::new().unwrap();
        let token = write_token(&dir, 0o600);
        let a = dir.path().join("a.txt");
        std::fs::write(&a, "hello").unwrap();
        let cli = parse(&[
            "-t",
            &token.to_string_lossy(),
            &a.to_string_lossy(),
        ]);
        let settings = Settings::new(&cli, "http://unused");

        let recorder = Recorder::default();
        let fake = recorder.clone();
        let mut out = Vec::new();
        run_with(&cli, &settings, std::io::empty(), &mut out, move |_| Ok(Box::new(fake))).unwrap();

        let seen = recorder.seen.borrow();
        assert!(!seen[0].public);
        assert_eq!(seen[0].description, None);
        let key = a.to_string_lossy().into_owned();
        assert_eq!(seen[0].files[&key].content, "hello");
    }

    #[test]
    fn network_failure_prints_nothing() {
        let dir = TempDir::new().unwrap();
        let token = write_token(&dir, 0o600);
        let cli = parse(&["-f", "a.txt", "-t", &token.to_string_lossy()]);
        let settings = Settings::new(&cli, "http://unused");

        let fake = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let mut out = Vec::new();
        let err = run_with(&cli, &settings, "hello".as_bytes(), &mut out, move |_| Ok(Box::new(fake)))
            .unwrap_err();

        assert!(out.is_empty());
        assert!(format!("{:#}", err).contains("503"));
    }

    #[cfg(unix)]
    #[test]
    fn loose_token_permissions_stop_before_network() {
        let dir = TempDir::new().unwrap();
        let token = write_token(&dir, 0o644);
        let cli = parse(&["-f", "a.txt", "-t", &token.to_string_lossy()]);
        let settings = Settings::new(&cli, "http://unused");

        let connected = Rc::new(RefCell::new(false));
        let flag = connected.clone();
        let mut out = Vec::new();
        let err = run_with(&cli, &settings, "hello".as_bytes(), &mut out, move |_| {
            *flag.borrow_mut() = true;
            Ok(Box::new(Recorder::default()))
        })
        .unwrap_err();

        assert!(!*connected.borrow());
        assert!(out.is_empty());
        assert!(err.to_string().contains("want 0600"));
    }

    #[test]
    fn anonymous_mode_never_reads_the_token() {
        let dir = TempDir::new().unwrap();
        // Would fail both the read and the permission check.
        let missing = dir.path().join("missing");
        let cli = parse(&["-a", "-f", "a.txt", "-t", &missing.to_string_lossy()]);
        let settings = Settings::new(&cli, "http://unused");

        let recorder = Recorder::default();
        let fake = recorder.clone();
        let mut out = Vec::new();
        run_with(&cli, &settings, "hello".as_bytes(), &mut out, move |token| {
            assert!(token.is_none());
            Ok(Box::new(fake))
        })
        .unwrap();

        assert_eq!(recorder.seen.borrow().len(), 1);
        assert!(load_credentials(&settings).unwrap().is_none());
    }

    #[test]
    fn connect_bounds_the_create_call() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_secs(10));
        });
        let cli = parse(&["-a", "-f", "a.txt"]);
        let mut settings = Settings::new(&cli, format!("http://{}", addr));
        settings.timeout = Duration::from_millis(300);

        let service = connect(&settings, None).unwrap();
        let req = build_request(&cli, "hello".as_bytes()).unwrap();
        let started = std::time::Instant::now();
        let err = service.create(req).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
        assert!(matches!(err, ApiError::Transport(_)), "{:?}", err);
    }

    #[test]
    fn success_exits_zero_and_writes_nothing_to_stderr() {
        let mut stderr = Vec::new();
        let ok: Result<GistResult> = Ok(GistResult {
            url: "https://gist.example/1".into(),
        });
        assert_eq!(exit_code(&ok, &mut stderr), 0);
        assert!(stderr.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn failure_exits_one_with_program_prefix() {
        let dir = TempDir::new().unwrap();
        let token = write_token(&dir, 0o644);
        let cli = parse(&["-f", "a.txt", "-t", &token.to_string_lossy()]);
        let settings = Settings::new(&cli, "http://unused");

        let mut out = Vec::new();
        let result = run_with(&cli, &settings, "hello".as_bytes(), &mut out, |_| {
            Ok(Box::new(Recorder::default()))
        });
        let mut stderr = Vec::new();
        assert_eq!(exit_code(&result, &mut stderr), 1);

        let stderr = String::from_utf8(stderr).unwrap();
        assert!(stderr.starts_with("gist: reading token: "), "{}", stderr);
        assert!(stderr.ends_with('\n'));
        assert!(out.is_empty());
    }

    #[test]
    fn settings_default_to_five_second_timeout() {
        let cli = parse(&["a.txt"]);
        let settings = Settings::new(&cli, DEFAULT_API_URL);
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.token_path, None);
        assert!(!settings.anonymous);
    }
}
