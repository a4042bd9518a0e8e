use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::time::{timeout, Instant};

use yeelight_control_lib::config::{DiscoveryOptions, DEFAULT_DEVICE_PORT};
use yeelight_control_lib::device::group::DeviceGroup;
use yeelight_control_lib::device::{Device, Power};
use yeelight_control_lib::protocol::response::ResponseKind;
use yeelight_control_lib::util::discovery::Discovery;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "yeelight_control",
    about = "Controls Yeelight smart bulbs on the local network",
    version
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats for the `discover` command.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Sends one command to a single bulb and prints what it answers
    #[clap(name = "device-call")]
    DeviceCall {
        /// IP address of the bulb
        #[clap(long)]
        ip: IpAddr,

        /// Control port of the bulb
        #[clap(long, default_value_t = DEFAULT_DEVICE_PORT)]
        port: u16,

        /// How long to wait for the answer, in milliseconds
        #[clap(long = "wait-ms", default_value_t = 2000)]
        wait_ms: u64,

        #[clap(subcommand)]
        action: DeviceAction,
    },
    /// Sends one command to several bulbs at once
    #[clap(name = "group")]
    Group {
        /// IP address of a member; repeat for every bulb
        #[clap(long = "ip", required = true)]
        ips: Vec<IpAddr>,

        /// Control port shared by the members
        #[clap(long, default_value_t = DEFAULT_DEVICE_PORT)]
        port: u16,

        #[clap(subcommand)]
        action: GroupAction,
    },
    /// Searches the local network for bulbs
    #[clap(name = "discover")]
    Discover {
        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,

        /// Search timeout in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 3000)]
        timeout: u64,
    },
}

/// Actions available under the `device-call` subcommand
#[derive(Subcommand)]
pub enum DeviceAction {
    /// Toggles the power state.
    #[clap(name = "toggle")]
    Toggle,
    /// Turns the bulb on or off.
    #[clap(name = "power")]
    Power {
        #[clap(value_enum)]
        state: Power,
    },
    /// Sets the brightness in percent (1-100).
    #[clap(name = "brightness")]
    Brightness { value: u8 },
    /// Sets an RGB color.
    #[clap(name = "rgb")]
    Rgb {
        /// Red component of the color (0-255)
        #[clap(short = 'r', long = "red")]
        red: u8,

        /// Green component of the color (0-255)
        #[clap(short = 'g', long = "green")]
        green: u8,

        /// Blue component of the color (0-255)
        #[clap(short = 'b', long = "blue")]
        blue: u8,
    },
    /// Sets hue (0-359) and saturation (0-100).
    #[clap(name = "hsv")]
    Hsv { hue: u16, saturation: u8 },
    /// Reads properties such as power, bright, rgb or name.
    #[clap(name = "get-prop")]
    GetProp {
        #[clap(required = true)]
        properties: Vec<String>,
    },
    /// Prints notifications until the bulb closes the connection.
    #[clap(name = "listen")]
    Listen {
        /// Stop after this many notifications
        #[clap(long)]
        count: Option<usize>,
    },
}

/// Actions available under the `group` subcommand
#[derive(Subcommand)]
pub enum GroupAction {
    /// Toggles every member.
    #[clap(name = "toggle")]
    Toggle,
    /// Turns every member on or off.
    #[clap(name = "power")]
    Power {
        #[clap(value_enum)]
        state: Power,
    },
    /// Sets the brightness of every member.
    #[clap(name = "brightness")]
    Brightness { value: u8 },
    /// Sets the same RGB color on every member.
    #[clap(name = "rgb")]
    Rgb {
        #[clap(short = 'r', long = "red")]
        red: u8,
        #[clap(short = 'g', long = "green")]
        green: u8,
        #[clap(short = 'b', long = "blue")]
        blue: u8,
    },
}

async fn handle_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Discover { output, timeout } => {
            let options = DiscoveryOptions::default().with_window(Duration::from_millis(timeout));
            let devices = Discovery::find_identifiers(&options).await?;
            match output {
                OutputFormat::Plaintext => {
                    Discovery::pretty_print_devices(&devices);
                }
                OutputFormat::Json => {
                    let json = serde_json::to_string(&devices)?;
                    println!("{}", json);
                }
                OutputFormat::Yaml => {
                    let yaml = serde_yaml::to_string(&devices)?;
                    println!("{}", yaml);
                }
            }
        }
        Commands::DeviceCall {
            ip,
            port,
            wait_ms,
            action,
        } => {
            let mut device = Device::new(&ip.to_string(), SocketAddr::new(ip, port));
            device
                .connect()
                .await
                .with_context(|| format!("Failed to connect to {}", device.address()))?;

            let result = run_device_action(&mut device, action, Duration::from_millis(wait_ms)).await;
            device.disconnect().await?;
            result?;
        }
        Commands::Group { ips, port, action } => {
            let devices = ips
                .into_iter()
                .map(|ip| Device::new(&ip.to_string(), SocketAddr::new(ip, port)))
                .collect();
            let mut group = DeviceGroup::from_devices(devices)?;

            if let Err(err) = group.connect_all().await {
                group.disconnect_all().await.ok();
                return Err(err).context("Failed to connect the group");
            }
            let result = match action {
                GroupAction::Toggle => group.toggle_all().await,
                GroupAction::Power { state } => group.set_power_all(state).await,
                GroupAction::Brightness { value } => group.set_brightness_all(value).await,
                GroupAction::Rgb { red, green, blue } => group.set_rgb_all(red, green, blue).await,
            };
            group.disconnect_all().await?;
            result?;
            println!("Command sent to {} device(s).", group.len());
        }
    }

    Ok(())
}

async fn run_device_action(device: &mut Device, action: DeviceAction, wait: Duration) -> Result<()> {
    let id = match action {
        DeviceAction::Toggle => device.toggle().await?,
        DeviceAction::Power { state } => device.set_power(state).await?,
        DeviceAction::Brightness { value } => device.set_brightness(value).await?,
        DeviceAction::Rgb { red, green, blue } => device.set_rgb(red, green, blue).await?,
        DeviceAction::Hsv { hue, saturation } => device.set_hsv(hue, saturation).await?,
        DeviceAction::GetProp { properties } => {
            let properties: Vec<&str> = properties.iter().map(String::as_str).collect();
            device.get_prop(&properties).await?
        }
        DeviceAction::Listen { count } => return listen(device, count).await,
    };

    let responses = device.responses()?;
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, responses.recv()).await {
            Ok(Some(response)) if response.answers(id) => {
                println!("{}", response);
                if response.kind() == ResponseKind::Error {
                    anyhow::bail!("{} rejected command {}", device.address(), id);
                }
                return Ok(());
            }
            Ok(Some(response)) => println!("{}", response),
            Ok(None) => anyhow::bail!("{} closed the connection", device.address()),
            Err(_) => {
                println!("No answer to command {} within {:?}", id, wait);
                return Ok(());
            }
        }
    }
}

async fn listen(device: &Device, count: Option<usize>) -> Result<()> {
    let responses = device.responses()?;
    let mut seen = 0;
    while count.map_or(true, |count| seen < count) {
        match responses.recv().await {
            Some(response) => {
                println!("{}", response);
                seen += 1;
            }
            None => break,
        }
    }
    Ok(())
}
