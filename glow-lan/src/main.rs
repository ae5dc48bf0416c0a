use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};

use glow_lan_lib::client::Client;
use glow_lan_lib::config::ClientConfig;
use glow_lan_lib::protocol::color::{Hsbk, NamedColor, RGB};
use glow_lan_lib::util::discovery::Discovery;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "glow_lan",
    about = "Discovers and controls LAN lighting devices",
    version = "0.1.0"
)]
pub struct Cli {
    /// YAML client configuration; defaults apply to anything it leaves out
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

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
    /// Subcommand for operations on a single device
    #[clap(name = "device-call")]
    DeviceCall {
        /// IP address of the device, optionally with a port
        #[clap(long)]
        ip: String,

        #[clap(subcommand)]
        action: DeviceAction,
    },
    /// Broadcasts discovery requests and lists the devices that answer
    #[clap(name = "discover")]
    Discover {
        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,

        /// Search timeout in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 5000)]
        timeout: u64,
    },
}

fn parse_duration(s: &str) -> Result<Duration, &'static str> {
    let millis = s
        .parse::<u64>()
        .map_err(|_| "could not parse duration in milliseconds")?;
    Ok(Duration::from_millis(millis))
}

/// Actions available under the `device-call` subcommand
#[derive(Subcommand)]
pub enum DeviceAction {
    #[clap(name = "get-power")]
    GetPower,
    #[clap(name = "set-power")]
    SetPower {
        #[clap(value_enum)]
        state: PowerState,

        /// Fade time in milliseconds; uses the light-level power message when set
        #[clap(long, value_parser = parse_duration)]
        duration: Option<Duration>,
    },
    /// Gets color, power and label in one request.
    #[clap(name = "get-color")]
    GetColor,
    /// Sets a solid color by name or by RGB components.
    #[clap(name = "set-color")]
    SetColor {
        /// The color to display by name
        #[clap(value_enum)]
        color: Option<NamedColor>,

        /// Red component of the color (0-255)
        #[clap(short = 'r', long = "red", value_parser = clap::value_parser!(u8))]
        red: Option<u8>,

        /// Green component of the color (0-255)
        #[clap(short = 'g', long = "green", value_parser = clap::value_parser!(u8))]
        green: Option<u8>,

        /// Blue component of the color (0-255)
        #[clap(short = 'b', long = "blue", value_parser = clap::value_parser!(u8))]
        blue: Option<u8>,

        /// Transition time in milliseconds
        #[clap(long, value_parser = parse_duration, default_value = "0")]
        duration: Duration,
    },
    #[clap(name = "get-label")]
    GetLabel,
    #[clap(name = "set-label")]
    SetLabel { label: String },
    #[clap(name = "get-group")]
    GetGroup,
    /// Gets vendor, product and firmware version.
    #[clap(name = "get-version")]
    GetVersion,
    /// Gets the colors of every zone of a multi-zone device.
    #[clap(name = "get-zones")]
    GetZones,
    /// Checks that the device echoes a payload back.
    #[clap(name = "echo")]
    Echo {
        #[clap(default_value = "ping")]
        text: String,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PowerState {
    On,
    Off,
}

fn load_config(path: Option<PathBuf>) -> Result<ClientConfig> {
    match path {
        Some(path) => ClientConfig::from_yaml_file(path),
        None => Ok(ClientConfig::default()),
    }
}

async fn handle_cli(cli: Cli) -> Result<()> {
    let config = load_config(cli.config)?;
    match cli.command {
        Commands::Discover { output, timeout } => {
            let devices = Discovery::find_devices(config, Duration::from_millis(timeout)).await?;
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
        Commands::DeviceCall { ip, action } => {
            let client = Client::start(ClientConfig {
                // a single device call never waits for discovery
                query_group_on_discovery: false,
                ..config
            })
            .await?;
            let result = device_call(&client, &ip, action).await;
            client.stop().await;
            result?;
        }
    }

    Ok(())
}

async fn device_call(client: &Client, ip: &str, action: DeviceAction) -> Result<()> {
    let device = client.connect_address(ip)?;

    match action {
        DeviceAction::GetPower => {
            let on = device.get_power().await?;
            println!("Power: {}", if on { "on" } else { "off" });
        }
        DeviceAction::SetPower { state, duration } => {
            let on = state == PowerState::On;
            match duration {
                Some(duration) => device.set_light_power(on, duration).await?,
                None => device.set_power(on).await?,
            }
            println!("Power set to {:?}", state);
        }
        DeviceAction::GetColor => {
            let color = device.get_color().await?;
            println!("Color: {:?}", color);
            println!("RGB: {:?}", color.to_rgb());
            if let Some(label) = device.label() {
                println!("Label: {}", label);
            }
        }
        DeviceAction::SetColor {
            color,
            red,
            green,
            blue,
            duration,
        } => {
            let color_to_show: Hsbk = match (color, red, green, blue) {
                (Some(color_name), None, None, None) => color_name.into(),
                (None, Some(r), Some(g), Some(b)) => RGB {
                    red: r,
                    green: g,
                    blue: b,
                }
                .into(),
                _ => return Err(anyhow!("Invalid color specification")),
            };
            device.set_color(color_to_show, duration).await?;
            println!("Displayed color: {:?}", color_to_show);
        }
        DeviceAction::GetLabel => {
            println!("Label: {}", device.get_label().await?);
        }
        DeviceAction::SetLabel { label } => {
            device.set_label(&label).await?;
            println!("Label set to {}", device.label().unwrap_or_default());
        }
        DeviceAction::GetGroup => {
            let group = device.get_group().await?;
            println!("Group: {} ({})", group.label(), group.id());
            println!("Updated at: {}", group.updated_at());
        }
        DeviceAction::GetVersion => {
            let version = device.get_version().await?;
            println!(
                "Vendor: {}, product: {}, version: {}",
                version.vendor, version.product, version.version
            );
        }
        DeviceAction::GetZones => {
            let zones = device.get_zones().await?;
            println!("{} zones:", zones.len());
            for (index, zone) in zones.iter().enumerate() {
                println!("{:>3}: {:?}", index, zone);
            }
        }
        DeviceAction::Echo { text } => {
            if device.echo(text.as_bytes()).await? {
                println!("Echo matched");
            } else {
                return Err(anyhow!("Echo payload came back altered"));
            }
        }
    }

    Ok(())
}
