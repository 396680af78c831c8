use log::{error, info};
use serde::{Deserialize, Serialize};

use std::{
    fs::File,
    io::{BufReader, BufWriter},
};

static CONFIG_PATH: &str = "ferricom.yaml";

#[derive(Serialize, Deserialize)]
pub struct Config {
    pub rom_path: String,
    /// Integer window scale over the 256x224 output
    pub scale: usize,
    pub turbo: u32,
}

impl Config {
    pub fn new() -> Config {
        Config {
            rom_path: String::new(),
            scale: 2,
            turbo: 1,
        }
    }

    pub fn load() -> Config {
        match File::open(CONFIG_PATH) {
            Ok(file) => match serde_yaml::from_reader(BufReader::new(file)) {
                Ok(config) => return config,
                Err(why) => error!("{}", why),
            },
            Err(why) => error!("{}", why),
        }
        info!("Initializing new config");
        Config::new()
    }

    pub fn save(&self) {
        let file = match File::create(CONFIG_PATH) {
            Ok(file) => file,
            Err(why) => {
                error!("{}", why);
                return;
            }
        };
        if let Err(why) = serde_yaml::to_writer(BufWriter::new(file), &self) {
            error!("{}", why);
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
