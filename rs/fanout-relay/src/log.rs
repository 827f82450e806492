use tracing_subscriber::EnvFilter;

/// Logging options.
#[derive(clap::Args, Clone, Debug)]
pub struct Log {
	/// Increase log verbosity.
	#[arg(long, short = 'v', action = clap::ArgAction::Count)]
	pub verbose: u8,
}

impl Log {
	/// Install the global subscriber. `RUST_LOG` wins over the verbosity flag.
	pub fn init(&self) {
		let default = match self.verbose {
			0 => "info",
			1 => "debug,webrtc=info",
			_ => "trace",
		};

		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

		tracing_subscriber::fmt().with_env_filter(filter).init();
	}
}
