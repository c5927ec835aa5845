use console::style;
use env_logger::{Builder, Env, Target};
use log::Level;
use std::io::Write;

/// Initialize the logger. Logs go to stderr; stdout carries only the report.
pub fn init_logger(verbose: bool) {
    builder(verbose).init();
}

fn builder(verbose: bool) -> Builder {
    let default_level = if verbose { "debug" } else { "warn" };
    let env = Env::default().filter_or("RUST_LOG", default_level);

    let mut builder = Builder::from_env(env);
    builder.target(Target::Stderr).format(move |buf, record| {
        let level = match record.level() {
            Level::Error => style("ERROR").red().bold(),
            Level::Warn => style("WARN ").yellow().bold(),
            Level::Info => style("INFO ").green(),
            Level::Debug => style("DEBUG").cyan(),
            Level::Trace => style("TRACE").dim(),
        };
        if verbose {
            writeln!(
                buf,
                "{} {} {}",
                level,
                style(record.target()).dim(),
                record.args()
            )
        } else {
            writeln!(buf, "{} {}", level, record.args())
        }
    });
    builder
}
