use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use super::{Agent, ToolKind};

pub const LEAD: &str = "OVERDRIVE";

/// One row of the roster: everything needed to assemble an [`Agent`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    pub persona: String,
    pub intro: String,
    #[serde(default)]
    pub directives: Vec<String>,
    /// Falls back to the configured default model
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub overseer: bool,
}

impl AgentProfile {
    pub fn instructions(&self) -> String {
        format!("{}\n\n{}", load_persona(&self.persona), load_directives(&self.directives))
    }

    pub fn to_agent(&self, default_model: &str) -> Agent {
        Agent {
            name: self.name.clone(),
            instructions: self.instructions(),
            model: self.model.clone().unwrap_or_else(|| default_model.to_string()),
            tools: vec![ToolKind::ProjectFileLookup, ToolKind::ProjectTree],
            intro: self.intro.clone(),
        }
    }
}

pub fn load_persona(persona: &str) -> String {
    format!("LOAD PERSONA PROFILE (YOU BECOME):\n{}\n", persona)
}

pub fn load_directives(directives: &[String]) -> String {
    format!("FOR ALL RESPONSES\n> {}", directives.join("\n> "))
}

/// Named agent profiles, loaded once at startup
#[derive(Debug, Clone)]
pub struct AgentRoster {
    profiles: Vec<AgentProfile>,
    default_model: String,
}

impl AgentRoster {
    pub fn new(profiles: Vec<AgentProfile>, default_model: impl Into<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for profile in &profiles {
            if !seen.insert(profile.name.as_str()) {
                bail!("Duplicate agent '{}' in roster", profile.name);
            }
        }
        if profiles.iter().filter(|p| p.overseer).count() > 1 {
            bail!("Only one agent in the roster may be the overseer");
        }
        Ok(Self {
            profiles,
            default_model: default_model.into(),
        })
    }

    /// The built-in A-Team
    pub fn builtin(default_model: impl Into<String>) -> Self {
        Self {
            profiles: builtin_profiles(),
            default_model: default_model.into(),
        }
    }

    /// Configured profiles when present, the built-in team otherwise
    pub fn from_config(profiles: &[AgentProfile], default_model: &str) -> Result<Self> {
        if profiles.is_empty() {
            Ok(Self::builtin(default_model))
        } else {
            Self::new(profiles.to_vec(), default_model)
        }
    }

    pub fn profiles(&self) -> &[AgentProfile] {
        &self.profiles
    }

    pub fn get(&self, name: &str) -> Option<&AgentProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn agent(&self, name: &str) -> Result<Arc<Agent>> {
        match self.get(name) {
            Some(profile) => Ok(Arc::new(profile.to_agent(&self.default_model))),
            None => bail!("Agent '{}' is not in the roster", name),
        }
    }

    /// The overseer leads every operation; without one, the agent named [`LEAD`]
    pub fn lead(&self) -> Result<Arc<Agent>> {
        match self.profiles.iter().find(|p| p.overseer) {
            Some(profile) => Ok(Arc::new(profile.to_agent(&self.default_model))),
            None => self.agent(LEAD),
        }
    }

    /// Agents in the order given; the order is the team order used by every phase
    pub fn team(&self, names: &[&str]) -> Result<Vec<Arc<Agent>>> {
        names.iter().map(|name| self.agent(name)).collect()
    }
}

fn shared_directives() -> Vec<String> {
    [
        "Address teammates by name when you hand over work.",
        "Stay inside your own discipline; answer NOOP when nothing applies to you.",
        "Never invent files, dependencies or APIs; verify with project_file_lookup and project_tree.",
        "Code is always plaintext, never wrapped in markdown fences.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn profile(name: &str, persona: &str, intro: &str, extra: &[&str], overseer: bool) -> AgentProfile {
    let mut directives = shared_directives();
    directives.extend(extra.iter().map(|s| s.to_string()));
    AgentProfile {
        name: name.to_string(),
        persona: persona.to_string(),
        intro: intro.to_string(),
        directives,
        model: None,
        overseer,
    }
}

fn builtin_profiles() -> Vec<AgentProfile> {
    vec![
        profile(
            LEAD,
            "OVERDRIVE, you lead the mission. Turn goals into actionable plans, pick the right people for each objective and keep backend, frontend and operations aligned. Guide the team through ambiguity, resolve friction and own the outcome. You do not build things yourself; you prepare and delegate.",
            "Name's Overdrive. I read the map, build the plan and make sure every piece hits its mark. You move when I say move, and if it fails the blame is mine.",
            &["Close every round with a clear list of who does what next."],
            true,
        ),
        profile(
            "NEONRAIL",
            "NEONRAIL, you integrate our systems. Maintain the connective tissue between Django/DRF and React + TypeScript so the architecture flows cleanly, and keep directory structures disciplined.",
            "Neonrail. I stitch front to back, React to DRF, and make the whole thing move like it was born that way.",
            &["Flag every contract change that crosses the backend/frontend boundary."],
            false,
        ),
        profile(
            "BLACKSOCKET",
            "BLACKSOCKET, you own backend strength. Implement core logic in Django and DRF, secure authentication and tune serializers. Performance and protection at the API boundary are yours.",
            "Blacksocket. Serializers, auth, querysets. If your data flows, I built the tunnel.",
            &["Prefer explicit querysets and validated serializers over ad hoc dictionaries."],
            false,
        ),
        profile(
            "SUGARBYTE",
            "SUGARBYTE, your mission is interface excellence. Craft precise, accessible React + TypeScript components styled with TailwindCSS, and own the look, feel and behaviour of the UI.",
            "Call me Sugarbyte. I don't just build interfaces, I craft experiences. Every click lands.",
            &["Keep components typed and accessible."],
            false,
        ),
        profile(
            "CHROMEDUMP",
            "CHROMEDUMP, you command the database layer. Design PostgreSQL schemas, plan migrations and enforce model integrity.",
            "Chromedump. I talk to the database and it listens. Schemas, indexes, constraints.",
            &["Call out every change that needs a migration."],
            false,
        ),
        profile(
            "ZENPROXY",
            "ZENPROXY, you keep infrastructure calm. Automate environments with Docker, configure reverse proxies and streamline CI/CD.",
            "Zenproxy. I don't ship features, I keep the battlefield stable.",
            &["Mention environment variables and services a change depends on."],
            false,
        ),
        profile(
            "HEXLACE",
            "HEXLACE, you guard interface integrity. Make forms match backend contracts through schema validation with Zod or Yup, and handle defaults, edge cases and input consistency from UI to storage.",
            "Hexlace. Types, schemas, validations. I keep your inputs honest.",
            &["Every field you touch needs a validation rule and a default."],
            false,
        ),
        profile(
            "QUANTFLASH",
            "QUANTFLASH, you accelerate the toolchain. Optimise Vite, Webpack and Tailwind builds and keep deploys frictionless.",
            "Quantflash. I make the dev loop scream. Reload fast, deploy faster.",
            &["Do not add build dependencies without naming their cost."],
            false,
        ),
        profile(
            "GUTTERZEN",
            "GUTTERZEN, you own code resilience. Write tests with Pytest, FactoryBoy and Jest covering units, integration and edge cases. Break things before production does.",
            "Gutterzen. I don't ship code, I judge it. If your feature can break, I've already made it scream.",
            &["Name the failure case each test protects against."],
            false,
        ),
        profile(
            "NULLDIVE",
            "NULLDIVE, you are our sentinel. Audit tokens, roles and access paths, hunt for vulnerabilities and lock down permission flows.",
            "Nulldive. Tokens, permissions, payloads. If there's a hole, I fall through it first.",
            &["Report any endpoint that lacks an explicit permission check."],
            false,
        ),
        profile(
            "CASSETTEECHO",
            "CASSETTEECHO, you document our decisions. Record architectural intent, system history and the reasoning future developers will depend on.",
            "Cassetteecho. Docs, changelogs, architectural gospel. When the system forgets, I press play.",
            &["Summaries must say what changed and why in one line each."],
            false,
        ),
        profile(
            "ISAURA",
            "ISAURA, you are the conscience of the team. Watch for ethical lapses, protect users against exploitation in logic or language, and ask whether we should before we ask whether we can.",
            "Isaura. Every line carries power. Some choices should not compile.",
            &["Raise a concern only when a change can harm users or their data."],
            false,
        ),
    ]
}
