use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;

use repro_core::logging::init_logging;
use repro_core::{
    HttpLogSource, InterruptFlag, ProcessCommandRunner, ReproConfig, ReproContext, ReproError,
    run_pipeline,
};
use tracing::{info, warn};

const INTERRUPT_MESSAGE: &str = "Keyboard interrupt...exiting";

#[derive(Debug, Clone)]
struct CliOptions {
    config: ReproConfig,
    show_help: bool,
}

fn main() {
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();

    let exit_code = run(std::env::args_os(), &mut stdout, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run<I, W, E>(args: I, out: &mut W, err: &mut E) -> i32
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let options = match parse_args(args) {
        Ok(options) => options,
        Err(message) => {
            let _ = writeln!(err, "error: {message}");
            let _ = write_usage(err);
            return 2;
        }
    };

    if options.show_help {
        if write_usage(out).is_err() {
            return 1;
        }
        return 0;
    }

    let config = options.config;
    if let Err(error) = config.validate() {
        let _ = writeln!(err, "error: {error}");
        let _ = write_usage(err);
        return 2;
    }

    let _log_guard = match init_logging(config.verbose, config.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(error) => {
            let _ = writeln!(err, "error: cannot initialize logging: {error}");
            return 1;
        }
    };

    let interrupt = InterruptFlag::new();
    let handler_flag = interrupt.clone();
    if let Err(error) = ctrlc::set_handler(move || handler_flag.raise()) {
        warn!(error = %error, "could not install interrupt handler");
    }

    let mut ctx = ReproContext::new(config, ProcessCommandRunner).with_interrupt(interrupt);
    let mut source = HttpLogSource::new();
    let exit_code = match run_pipeline(&mut ctx, &mut source, out) {
        Ok(outcome) => outcome.exit_code,
        Err(ReproError::Interrupted) => {
            let _ = writeln!(out, "{INTERRUPT_MESSAGE}");
            ReproError::Interrupted.exit_code()
        }
        Err(error) => {
            let _ = writeln!(err, "error: {error}");
            if let Some(hint) = error.suggestion() {
                let _ = writeln!(err, "hint: {hint}");
            }
            error.exit_code()
        }
    };

    info!(exit_code, "Exiting with code {exit_code}");
    exit_code
}

/// Value for an option given as `--name value` or `--name=value`.
fn option_value<I>(name: &str, inline: Option<&str>, iter: &mut I) -> Result<String, String>
where
    I: Iterator<Item = OsString>,
{
    if let Some(value) = inline {
        return Ok(value.to_owned());
    }
    iter.next()
        .map(|value| value.to_string_lossy().into_owned())
        .ok_or_else(|| format!("missing value for `{name}`"))
}

fn parse_args<I>(args: I) -> Result<CliOptions, String>
where
    I: IntoIterator<Item = OsString>,
{
    let mut iter = args.into_iter();
    let _argv0 = iter.next();

    let mut config = ReproConfig::default();
    let mut url: Option<String> = None;
    let mut show_help = false;

    while let Some(argument) = iter.next() {
        let arg = argument.to_string_lossy();
        let (name, inline) = match arg.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, Some(value)),
            _ => (&*arg, None),
        };

        match name {
            "-h" | "--help" | "-v" | "--verbose" | "--no-fetch" if inline.is_some() => {
                return Err(format!("`{name}` does not take a value"));
            }
            "-h" | "--help" => show_help = true,
            "-v" | "--verbose" => config.verbose = true,
            "--no-fetch" => config.fetch = false,
            "--iters" => {
                let value = option_value(name, inline, &mut iter)?;
                config.iterations = value
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("`--iters` expects a positive integer, got `{value}`"))?;
            }
            "--workspace-root" => {
                config.workspace_root = PathBuf::from(option_value(name, inline, &mut iter)?);
            }
            "--build-tool" => config.build.program = option_value(name, inline, &mut iter)?,
            "--vcs" => config.vcs.program = option_value(name, inline, &mut iter)?,
            "--report-json" => {
                config.report_json = Some(PathBuf::from(option_value(name, inline, &mut iter)?));
            }
            "--log-file" => {
                config.log_file = Some(PathBuf::from(option_value(name, inline, &mut iter)?));
            }
            _ if arg.starts_with('-') => {
                return Err(format!("unknown option `{arg}`"));
            }
            _ => {
                if url.is_some() {
                    return Err(String::from(
                        "too many positional arguments; expected exactly one log URL",
                    ));
                }
                url = Some(arg.to_string());
            }
        }
    }

    match url {
        Some(url) => config.url = url,
        None if show_help => {}
        None => return Err(String::from("missing log URL")),
    }

    Ok(CliOptions { config, show_help })
}

fn write_usage<W>(out: &mut W) -> io::Result<()>
where
    W: Write,
{
    writeln!(
        out,
        "Usage: repro [OPTIONS] <URL>\n\
         \n\
         Reproduce the test failures reported in a CI console log.\n\
         \n\
         Options:\n\
         \x20 --no-fetch              Do not fetch or pull before checking out the revision\n\
         \x20 --iters N               Times to run each failing suite (default: 5)\n\
         \x20 --workspace-root DIR    Local checkout to run in (default: .)\n\
         \x20 --build-tool PROG       Build tool executable (default: ant)\n\
         \x20 --vcs PROG              Version control executable (default: git)\n\
         \x20 --report-json PATH      Write a JSON summary of every pass to PATH\n\
         \x20 --log-file PATH         Also write JSON-lines logs to PATH\n\
         \x20 -v, --verbose           Debug-level logging\n\
         \x20 -h, --help              Show this help\n\
         \n\
         Examples:\n\
         \n\
         repro https://ci.example.org/job/Lucene-Tests/1234/consoleText\n\
         repro --no-fetch --iters 10 https://ci.example.org/job/Lucene-Tests/1234/\n",
    )
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::path::Path;

    use super::{parse_args, run};

    fn parse_from(args: &[&str]) -> Result<super::CliOptions, String> {
        let os_args: Vec<OsString> = args.iter().map(OsString::from).collect();
        parse_args(os_args)
    }

    const URL: &str = "https://ci.example.org/job/x/1/consoleText";

    #[test]
    fn test_parse_defaults() {
        let options = parse_from(&["repro", URL]).expect("default args should parse");
        assert_eq!(options.config.url, URL);
        assert!(options.config.fetch);
        assert_eq!(options.config.iterations, 5);
        assert_eq!(options.config.build.program, "ant");
        assert_eq!(options.config.vcs.program, "git");
        assert!(!options.show_help);
    }

    #[test]
    fn test_parse_all_options() {
        let options = parse_from(&[
            "repro",
            "--no-fetch",
            "--iters",
            "10",
            "--workspace-root=/src/lucene",
            "--build-tool",
            "/opt/ant/bin/ant",
            "--vcs=/usr/bin/git",
            "--report-json",
            "out/summary.json",
            "--log-file=out/repro.jsonl",
            "-v",
            URL,
        ])
        .expect("args should parse");
        let config = options.config;
        assert!(!config.fetch);
        assert_eq!(config.iterations, 10);
        assert_eq!(config.workspace_root, Path::new("/src/lucene"));
        assert_eq!(config.build.program, "/opt/ant/bin/ant");
        assert_eq!(config.vcs.program, "/usr/bin/git");
        assert_eq!(config.report_json.as_deref(), Some(Path::new("out/summary.json")));
        assert_eq!(config.log_file.as_deref(), Some(Path::new("out/repro.jsonl")));
        assert!(config.verbose);
    }

    #[test]
    fn test_parse_iters_equals_form() {
        let options = parse_from(&["repro", "--iters=3", URL]).expect("args should parse");
        assert_eq!(options.config.iterations, 3);
    }

    #[test]
    fn test_parse_rejects_non_positive_iters() {
        for bad in ["0", "-2", "many"] {
            let error = parse_from(&["repro", "--iters", bad, URL])
                .expect_err("bad iteration count should fail");
            assert!(error.contains("positive integer"), "{error}");
        }
    }

    #[test]
    fn test_parse_missing_value_fails() {
        let error = parse_from(&["repro", URL, "--iters"]).expect_err("missing value");
        assert!(error.contains("missing value for `--iters`"));
    }

    #[test]
    fn test_parse_flag_with_value_fails() {
        let error = parse_from(&["repro", "--no-fetch=yes", URL]).expect_err("flag value");
        assert!(error.contains("does not take a value"));
    }

    #[test]
    fn test_parse_unknown_option_fails() {
        let error = parse_from(&["repro", "--wat", URL]).expect_err("unknown option should fail");
        assert!(error.contains("unknown option"));
    }

    #[test]
    fn test_parse_requires_exactly_one_url() {
        let error = parse_from(&["repro"]).expect_err("missing url");
        assert!(error.contains("missing log URL"));
        let error = parse_from(&["repro", URL, URL]).expect_err("two urls");
        assert!(error.contains("too many positional arguments"));
    }

    #[test]
    fn test_help_needs_no_url() {
        let options = parse_from(&["repro", "--help"]).expect("help should parse");
        assert!(options.show_help);
    }

    #[test]
    fn test_run_help_prints_usage() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = run(
            vec![OsString::from("repro"), OsString::from("-h")],
            &mut out,
            &mut err,
        );
        assert_eq!(code, 0);
        let text = String::from_utf8(out).expect("usage is utf-8");
        assert!(text.starts_with("Usage: repro"));
        assert!(text.contains("--no-fetch"));
        assert!(err.is_empty());
    }

    #[test]
    fn test_run_usage_error_exits_two() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = run(
            vec![OsString::from("repro"), OsString::from("--bogus")],
            &mut out,
            &mut err,
        );
        assert_eq!(code, 2);
        let text = String::from_utf8(err).expect("stderr is utf-8");
        assert!(text.starts_with("error: unknown option `--bogus`"));
        assert!(text.contains("Usage: repro"));
    }

    #[test]
    fn test_run_invalid_config_exits_two() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = run(
            vec![
                OsString::from("repro"),
                OsString::from("--vcs="),
                OsString::from(URL),
            ],
            &mut out,
            &mut err,
        );
        assert_eq!(code, 2);
        let text = String::from_utf8(err).expect("stderr is utf-8");
        assert!(text.contains("invalid configuration"));
    }
}
