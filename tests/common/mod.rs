#![allow(dead_code)]

use std::{fs, path::Path};

use physigym::prelude::*;
use tempfile::TempDir;

pub const SETTINGS_FILE: &str = "PhysiCell_settings.xml";

/// Small 2D domain, five gym steps per episode.
pub fn settings_xml(max_time: f64, number_of_cells: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<PhysiCell_settings>
    <domain>
        <x_min>-100</x_min><x_max>100</x_max>
        <y_min>-100</y_min><y_max>100</y_max>
        <z_min>-10</z_min><z_max>10</z_max>
        <dx>20</dx><dy>20</dy><dz>20</dz>
        <use_2D>true</use_2D>
    </domain>
    <overall><max_time units="min">{max_time}</max_time></overall>
    <options><random_seed>0</random_seed></options>
    <save>
        <folder>output</folder>
        <full_data><interval units="min">60</interval></full_data>
    </save>
    <microenvironment_setup><variable name="drug" ID="0"/></microenvironment_setup>
    <cell_definitions>
        <cell_definition name="tumor" ID="0">
            <custom_data><sensitivity>1.0</sensitivity></custom_data>
        </cell_definition>
        <cell_definition name="tumor_resistant" ID="1">
            <custom_data><sensitivity>0.1</sensitivity></custom_data>
        </cell_definition>
    </cell_definitions>
    <user_parameters>
        <random_seed type="int">0</random_seed>
        <number_of_cells type="int">{number_of_cells}</number_of_cells>
        <cell_count type="int">0</cell_count>
        <drug_dose type="double">0.0</drug_dose>
    </user_parameters>
</PhysiCell_settings>
"#
    )
}

/// Temporary working directory holding a settings document.
pub fn workdir(max_time: f64, number_of_cells: u32) -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(dir.path().join(SETTINGS_FILE), settings_xml(max_time, number_of_cells))
        .expect("Failed to write settings");
    dir
}

pub fn config(dir: &Path) -> EnvConfig {
    EnvConfig::default()
        .with_settingxml(SETTINGS_FILE)
        .with_workdir(dir)
        .without_render()
        .with_verbose(false)
}

pub fn make_env(dir: &Path) -> PhysiCellEnv<ToySimulation, DrugDoseModel> {
    let cfg = config(dir);
    let settings = Settings::from_path(cfg.settingxml_path()).expect("Failed to parse settings");
    let sim = ToySimulation::new(&settings, dir.join(&settings.save_folder));
    PhysiCellEnv::new(cfg, sim, DrugDoseModel::default()).expect("Failed to build environment")
}
