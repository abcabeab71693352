#![allow(dead_code)]

use gfxvirt_schema::{ApiRegistry, GeneratorOptions};

pub const MINI_VK: &str = include_str!("../fixtures/mini_vk.json");

pub fn mini_vk() -> ApiRegistry {
    mini_vk_with(GeneratorOptions::default())
}

pub fn mini_vk_with(options: GeneratorOptions) -> ApiRegistry {
    init_tracing();
    ApiRegistry::from_json_str(MINI_VK, options).expect("fixture schema builds")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
