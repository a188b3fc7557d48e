use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use toml::Table;

use tessera::sim::config::{Config, SimConfig};
use tessera::sim::main_mem::MainMemConfig;
use tessera::sim::top::{TesseraTop, TesseraTopConfig, TileConfig};
use tessera::traffic::{TrafficConfig, TrafficDriver};

#[derive(Parser)]
#[command(version, about)]
struct TesseraArgs {
    #[arg(help = "Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help = "Override program image path")]
    image_path: Option<PathBuf>,
    #[arg(long, help = "Override number of L1 banks")]
    num_l1_banks: Option<usize>,
    #[arg(long, help = "Override number of L2 banks")]
    num_l2_banks: Option<usize>,
    #[arg(long, help = "Enable hit-under-miss in every bank")]
    hit_under_miss: Option<bool>,
    #[arg(long, help = "Override simulation timeout in cycles")]
    timeout: Option<u64>,
}

pub fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let argv = TesseraArgs::parse();
    let config = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {:?}", argv.config_path))?;
    let config_table: Table = toml::from_str(&config).context("cannot parse config toml")?;

    let mut sim_config = SimConfig::from_section(config_table.get("sim"));
    let mut tile_config = TileConfig::from_section(config_table.get("tile"));
    let main_mem_config = MainMemConfig::from_section(config_table.get("main_mem"));
    let traffic_config = TrafficConfig::from_section(config_table.get("traffic"));

    // override toml configs with argv
    if let Some(path) = argv.image_path {
        sim_config.image = Some(path);
    }
    sim_config.timeout = argv.timeout.unwrap_or(sim_config.timeout);
    tile_config.num_l1_banks = argv.num_l1_banks.unwrap_or(tile_config.num_l1_banks);
    tile_config.num_l2_banks = argv.num_l2_banks.unwrap_or(tile_config.num_l2_banks);
    if let Some(hum) = argv.hit_under_miss {
        tile_config.l1.hit_under_miss = hum;
        tile_config.l2.hit_under_miss = hum;
    }

    let log_stats = sim_config.log_stats;
    let image = sim_config.image.clone();
    let top_config = TesseraTopConfig {
        sim: sim_config,
        tile: tile_config.clone(),
        main_mem: main_mem_config,
    };
    let mut top = TesseraTop::new(&top_config);
    if let Some(path) = image {
        top.load_image(&path)?;
    }

    let mut driver = TrafficDriver::new(&traffic_config, tile_config.num_cores, tile_config.id)?;
    let summary = top.simulate(&mut driver)?;
    if log_stats {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}
