use clap::{Args as ClapArgs, Parser, Subcommand};
use crossbeam::channel::unbounded;
use ringbuf::traits::{Producer, Split};
use ringbuf::HeapRb;
use tone_backend::audio_io;
use tone_backend::command::Command;
use tone_backend::config::EngineConfig;
use tone_backend::models::{PerformanceData, ScriptedSensors};
use tone_backend::scheduler::StreamScheduler;
use tone_backend::sensors::SensorSource;

/// CLI for streaming or rendering a scripted touch performance
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream or render a performance JSON file
    Run(RunArgs),
    /// Generate a default config file and exit
    GenerateConfig(ConfigArgs),
}

#[derive(ClapArgs)]
struct RunArgs {
    /// Path to the performance JSON file
    #[arg(long)]
    path: String,
    /// Engine config TOML; omitted means the stock hardware tuning
    #[arg(long)]
    config: Option<String>,
    /// Render the performance to a WAV file instead of streaming
    #[arg(long, default_value_t = false)]
    generate: bool,
    /// Output path used with --generate
    #[arg(long, default_value = "performance.wav")]
    out: String,
    /// Start streaming from this time in seconds into the script
    #[arg(long, default_value_t = 0.0)]
    start: f64,
}

#[derive(ClapArgs)]
struct ConfigArgs {
    /// Output path for the generated configuration
    #[arg(long, default_value = "config.toml")]
    out: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_command(args)?,
        Commands::GenerateConfig(cfg) => {
            EngineConfig::generate_default(&cfg.out)?;
            println!("Generated default config at {}", cfg.out);
        }
    }
    Ok(())
}

fn run_command(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let json_str = std::fs::read_to_string(&args.path)?;
    let script: PerformanceData = serde_json::from_str(&json_str)?;
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if args.generate {
        tone_backend::render_wav(&config, script, &args.out)?;
        println!("Generated performance at {}", args.out);
        return Ok(());
    }

    let mut sensors = ScriptedSensors::new(script, config.sample_rate);
    if args.start > 0.0 {
        sensors.advance((args.start * config.sample_rate as f64) as usize);
    }
    let mut scheduler = StreamScheduler::new(&config, Box::new(sensors))?;
    scheduler.start();

    let rb = HeapRb::<Command>::new(64);
    let (mut prod, cons) = rb.split();
    let (tx, rx) = unbounded();
    let rx_thread = rx.clone();

    std::thread::spawn(move || {
        audio_io::run_audio_stream(scheduler, cons, rx_thread);
    });

    println!("Streaming {}...", args.path);
    println!("Controls: p = toggle pause/resume, q = quit");
    ctrlc::set_handler({
        let tx = tx.clone();
        move || {
            let _ = tx.send(());
        }
    })?;

    let input_thread = std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut paused = false;
        loop {
            let mut buf = String::new();
            if stdin.read_line(&mut buf).is_err() {
                continue;
            }
            match buf.trim() {
                "p" => {
                    paused = !paused;
                    let _ = prod.try_push(Command::SetPaused(paused));
                    if paused {
                        println!("Paused");
                    } else {
                        println!("Resumed");
                    }
                }
                "q" => {
                    let _ = tx.send(());
                    break;
                }
                _ => {
                    println!("p = pause/resume, q = quit");
                }
            }
        }
    });

    let _ = rx.recv();
    let _ = input_thread.join();
    Ok(())
}
