//! JSON readout configuration.
//!
//! ```json
//! {
//!   "stacks": [
//!     {
//!       "name": "event0",
//!       "groups": [
//!         { "name": "mdpp16", "commands": ["vme_block_read 0x00000000 amod=mblt64 max=65535"] }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Stack `i` in the list is uploaded as readout stack `i + 1` and produces
//! event index `i`.

use std::path::Path;

use mvlc_command::{parse_command_line, Command, StackCommandBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{ReadoutError, Result};
use crate::structure::ReadoutStructure;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadoutConfig {
    #[serde(default)]
    pub stacks: Vec<StackConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// One module's readout commands in text form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl ReadoutConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ReadoutError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse every command and build one stack builder per stack.
    pub fn stack_builders(&self) -> Result<Vec<StackCommandBuilder>> {
        self.stacks.iter().map(StackConfig::builder).collect()
    }

    pub fn readout_structure(&self) -> Result<ReadoutStructure> {
        ReadoutStructure::from_stacks(&self.stack_builders()?)
    }
}

impl StackConfig {
    pub fn builder(&self) -> Result<StackCommandBuilder> {
        let mut builder = StackCommandBuilder::new(self.name.as_str());
        for group in &self.groups {
            builder.begin_group(group.name.as_str());
            for (index, line) in group.commands.iter().enumerate() {
                let cmd = match parse_command_line(line) {
                    Ok(Command::Stack(cmd)) => cmd,
                    Ok(Command::Super(_)) => {
                        return Err(ReadoutError::NotAStackCommand {
                            stack: self.name.clone(),
                            group: group.name.clone(),
                            command: line.trim().to_string(),
                        })
                    }
                    Err(source) => {
                        return Err(ReadoutError::Command {
                            stack: self.name.clone(),
                            group: group.name.clone(),
                            index,
                            source,
                        })
                    }
                };
                builder.add(cmd)?;
            }
        }
        Ok(builder)
    }
}
