// Copyright 2018-2025 the Deno authors. MIT license.

use std::io::Write;

pub fn init(maybe_level: Option<log::Level>) {
  let log_level = maybe_level.unwrap_or(log::Level::Info);
  env_logger::Builder::from_env(
    env_logger::Env::new()
      // Use `NPMLINK_LOG` and `NPMLINK_LOG_STYLE` instead of `RUST_` prefix
      .filter_or("NPMLINK_LOG", log_level.to_level_filter().to_string())
      .write_style("NPMLINK_LOG_STYLE"),
  )
  .format(|buf, record| {
    if record.level() <= log::Level::Info {
      // Print ERROR, WARN and INFO logs as they are
      writeln!(buf, "{}", record.args())
    } else {
      // Add prefix to DEBUG or TRACE logs
      writeln!(
        buf,
        "{} {} - {}",
        record.level(),
        record.target(),
        record.args()
      )
    }
  })
  .init();
}
