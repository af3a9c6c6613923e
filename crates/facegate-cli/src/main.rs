use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_hw::{Camera, Resolution};
use std::time::{Duration, Instant};

#[zbus::proxy(
    interface = "org.facegate.Facegate1",
    default_service = "org.facegate.Facegate1",
    default_path = "/org/facegate/Facegate1"
)]
trait Facegate {
    fn recognize(&self) -> zbus::Result<String>;
    fn enroll(&self, name: &str) -> zbus::Result<String>;
    fn switch_camera(&self, index: u32) -> zbus::Result<bool>;
    fn list_identities(&self) -> zbus::Result<String>;
    fn remove_identity(&self, name: &str) -> zbus::Result<bool>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face identification CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the person in front of the camera
    Recognize,
    /// Capture samples and enroll a new identity
    Enroll {
        /// Identity name
        name: String,
    },
    /// Switch the daemon to another camera
    SwitchCamera {
        /// V4L2 index (/dev/video{index})
        index: u32,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity and its samples
    Remove {
        name: String,
    },
    /// Show daemon status
    Status,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// Camera index to test
        #[arg(short, long, default_value_t = 0)]
        index: u32,
        /// Frames to capture
        #[arg(short, long, default_value_t = 10)]
        frames: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Test { index, frames } = cli.command {
        return tokio::task::spawn_blocking(move || camera_test(index, frames)).await?;
    }

    let builder = if cli.session {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    // Enrollment blocks for the whole capture and training run.
    let conn = builder
        .method_timeout(Duration::from_secs(120))
        .build()
        .await
        .context("cannot connect to D-Bus")?;
    let proxy = FacegateProxy::new(&conn).await?;

    match cli.command {
        Commands::Recognize => {
            let reply = proxy.recognize().await?;
            let identity: serde_json::Value = serde_json::from_str(&reply)?;
            println!(
                "Recognized {} (distance {:.3})",
                identity["name"].as_str().unwrap_or("?"),
                identity["distance"].as_f64().unwrap_or(f64::NAN)
            );
            println!("  enrolled:  {}", identity["enrolled_at"].as_str().unwrap_or("-"));
            println!("  last seen: {}", identity["last_seen"].as_str().unwrap_or("-"));
        }
        Commands::Enroll { name } => {
            println!("Enrolling {name}; look at the camera...");
            let reply: serde_json::Value = serde_json::from_str(&proxy.enroll(&name).await?)?;
            println!("Captured {}/{} samples", reply["saved"], reply["requested"]);
            if reply["persisted"].as_bool() == Some(true) {
                println!("{name} enrolled");
            } else {
                println!("No usable face found in the samples; {name} was not enrolled");
            }
        }
        Commands::SwitchCamera { index } => {
            proxy.switch_camera(index).await?;
            println!("Switched to /dev/video{index}");
        }
        Commands::List => {
            let identities: Vec<serde_json::Value> =
                serde_json::from_str(&proxy.list_identities().await?)?;
            if identities.is_empty() {
                println!("No identities enrolled");
            }
            for identity in identities {
                println!(
                    "{:<24} enrolled {}  last seen {}",
                    identity["name"].as_str().unwrap_or("?"),
                    identity["enrolled_at"].as_str().unwrap_or("-"),
                    identity["last_seen"].as_str().unwrap_or("-"),
                );
            }
        }
        Commands::Remove { name } => {
            proxy.remove_identity(&name).await?;
            println!("Removed {name}");
        }
        Commands::Status => {
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Test { .. } => {}
    }

    Ok(())
}

fn camera_test(index: u32, frames: u32) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for device in &devices {
        println!(
            "  [{}] {} ({}, {}, {})",
            device.index, device.path, device.name, device.driver, device.bus
        );
    }

    tracing::debug!(index, "probing camera");
    let camera = Camera::open(index, Resolution::default())
        .with_context(|| format!("cannot open camera {index}"))?;
    println!(
        "Opened /dev/video{index}: {}x{} {:?}",
        camera.width, camera.height, camera.fourcc
    );

    let started = Instant::now();
    let mut captured = 0u32;
    let mut brightness = 0f64;
    for _ in 0..frames {
        match camera.capture_frame() {
            Ok(frame) => {
                captured += 1;
                let pixels = frame.image.as_raw();
                brightness += pixels.iter().map(|&p| p as f64).sum::<f64>() / pixels.len().max(1) as f64;
            }
            Err(e) => println!("  capture failed: {e}"),
        }
    }
    let elapsed = started.elapsed();
    drop(camera);

    println!(
        "Captured {captured}/{frames} frames in {:.2}s",
        elapsed.as_secs_f64()
    );
    if captured > 0 {
        println!(
            "  {:.1} fps, mean brightness {:.1}",
            captured as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
            brightness / captured as f64
        );
    }
    Ok(())
}
