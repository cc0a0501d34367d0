use std::path::Path;

use flexi_logger::{style, FlexiLoggerError, Level};

fn reduced_colored_format(
    w: &mut dyn std::io::Write,
    now: &mut flexi_logger::DeferredNow,
    record: &flexi_logger::Record,
) -> Result<(), std::io::Error> {
    let level = record.level();
    write!(
        w,
        "{} {:<5} {} {} {}",
        now.now().format("%H:%M:%S"),
        style(level, level),
        record.module_path().unwrap_or("<unnamed>"),
        style(level, ">"),
        &record.args(),
    )
}

fn fully_colored_format(
    w: &mut dyn std::io::Write,
    now: &mut flexi_logger::DeferredNow,
    record: &flexi_logger::Record,
) -> Result<(), std::io::Error> {
    let level = record.level();
    let part1 = format!("{} {:<5} {} > ",
        now.now().format("%H:%M:%S"),
        level,
        record.module_path().unwrap_or("<unnamed>"),
    );
    write!(w, "{}{}",
        style(level, part1),
        style(level, &record.args()),
    )
}

fn colored_format(
    w: &mut dyn std::io::Write,
    now: &mut flexi_logger::DeferredNow,
    record: &flexi_logger::Record,
) -> Result<(), std::io::Error> {
    match record.level() {
        Level::Error | Level::Warn => fully_colored_format(w, now, record),
        Level::Info | Level::Debug | Level::Trace => reduced_colored_format(w, now, record),
    }
}

fn file_format(
    w: &mut dyn std::io::Write,
    now: &mut flexi_logger::DeferredNow,
    record: &flexi_logger::Record,
 ) -> Result<(), std::io::Error> {
    write!(
        w,
        "[{}] {:<5} [{}:{}] {}",
        now.now().format("%Y-%m-%d %H:%M:%S%.3f %:z"),
        record.level(),
        record.file().unwrap_or("<unnamed>"),
        record.line().unwrap_or(0),
        &record.args(),
    )
}

/// Logs to `dir` and to stderr. The level comes from `RUST_LOG`, default is `info`.
/// Stdout is left alone, the console host talks to the operator there.
pub fn init_logging(dir: impl AsRef<Path>) -> Result<(), FlexiLoggerError> {
    flexi_logger::Logger::with_env_or_str("info")
        .log_to_file()
        .format_for_files(file_format)
        .set_palette("196;208;120;141;241".to_string()) // https://jonasjacek.github.io/colors/
        .format_for_stderr(colored_format)
        .duplicate_to_stderr(flexi_logger::Duplicate::All)
        .directory(dir.as_ref().to_path_buf())
        .start()?;

    // also log panics
    std::panic::set_hook(Box::new(|panic_info| {
        error!(target: "PANIC", "{}", panic_info);
    }));

    Ok(())
}
