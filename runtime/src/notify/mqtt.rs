//! Home Assistant sensors over MQTT.
//!
//! Each student gets one device with three sensors (homework count,
//! homework details, last check) announced through MQTT discovery. After
//! every successful fetch a retained state message carries today's
//! homework for that student.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use schoolwatch::HomeworkItem;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Homework text longer than this is cut in the details sensor.
const MAX_DETAIL_CHARS: usize = 200;

const DISCOVERY_PREFIX: &str = "homeassistant/sensor";

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker: String::new(),
            port: 1883,
            username: None,
            password: None,
            client_id: "schoolwatch".to_string(),
        }
    }
}

/// Sink for retained MQTT messages.
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<()>;
}

/// `rumqttc` client whose event loop runs on a background task.
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    /// Start the client. The connection is made (and remade) by the event
    /// loop, so an unreachable broker only shows up in the log.
    pub fn connect(settings: &MqttSettings) -> Self {
        let mut options =
            MqttOptions::new(settings.client_id.as_str(), settings.broker.as_str(), settings.port);
        options.set_keep_alive(Duration::from_secs(60));
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            if !user.is_empty() && !pass.is_empty() {
                options.set_credentials(user.as_str(), pass.as_str());
            }
        }

        let (client, mut eventloop) = AsyncClient::new(options, 32);
        let target = format!("{}:{}", settings.broker, settings.port);
        tokio::spawn(async move {
            let mut connected = false;
            loop {
                match eventloop.poll().await {
                    Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                        connected = true;
                        info!(broker = %target, "MQTT connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connected {
                            warn!(broker = %target, "MQTT connection lost: {e}");
                        } else {
                            debug!(broker = %target, "MQTT connect failed: {e}");
                        }
                        connected = false;
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Self { client }
    }
}

#[async_trait]
impl Publish for MqttPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, true, payload)
            .await
            .with_context(|| format!("MQTT publish to {topic}"))
    }
}

/// Publishes discovery and state for each student.
pub struct HomeAssistant {
    sink: Arc<dyn Publish>,
    announced: Mutex<HashSet<String>>,
}

impl HomeAssistant {
    pub fn new(sink: Arc<dyn Publish>) -> Self {
        Self {
            sink,
            announced: Mutex::new(HashSet::new()),
        }
    }

    pub fn connect(settings: &MqttSettings) -> Self {
        Self::new(Arc::new(MqttPublisher::connect(settings)))
    }

    /// Announce the student's sensors (once per process) and publish the
    /// current state. Failures are logged.
    pub async fn publish(&self, student: &str, items: &[HomeworkItem], now: DateTime<Local>) {
        let first = self
            .announced
            .lock()
            .map(|mut set| set.insert(student.to_string()))
            .unwrap_or(true);
        if first {
            for (topic, config) in discovery_configs(student) {
                if let Err(e) = self.sink.publish(&topic, config.to_string()).await {
                    warn!("MQTT discovery failed: {e:#}");
                    self.forget(student);
                    break;
                }
            }
        }

        let state = state_payload(student, items, now);
        let count = state["count"].as_u64().unwrap_or(0);
        match self.sink.publish(&state_topic(student), state.to_string()).await {
            Ok(()) => info!(student = %student, today = count, "MQTT state published"),
            Err(e) => warn!("MQTT state failed: {e:#}"),
        }
    }

    fn forget(&self, student: &str) {
        if let Ok(mut set) = self.announced.lock() {
            set.remove(student);
        }
    }
}

/// ASCII device id for a student name, stable across runs.
pub fn device_id(student: &str) -> String {
    let digest = format!("{:x}", md5::compute(student.as_bytes()));
    format!("student_{}", &digest[..8])
}

pub fn state_topic(student: &str) -> String {
    format!("smartschool/{}/state", device_id(student))
}

/// Discovery topics and their config payloads.
pub fn discovery_configs(student: &str) -> Vec<(String, Value)> {
    let id = device_id(student);
    let state_topic = format!("smartschool/{id}/state");
    let device = json!({
        "identifiers": [format!("smartschool_{id}")],
        "name": format!("SmartSchool - {student}"),
        "manufacturer": "SmartSchool Monitor",
        "model": "Homework Tracker"
    });

    // (topic suffix, unique-id suffix, label, state field, icon)
    let sensors = [
        ("count", "homework_count", "Homework Count", "count", "mdi:book-open-variant"),
        ("details", "homework_details", "Homework Details", "details", "mdi:text-box-multiple"),
        ("last_check", "last_check", "Last Check", "last_check", "mdi:clock-check"),
    ];

    sensors
        .into_iter()
        .map(|(suffix, unique, label, field, icon)| {
            let mut config = json!({
                "name": format!("SmartSchool {student} {label}"),
                "unique_id": format!("smartschool_{id}_{unique}"),
                "state_topic": state_topic,
                "value_template": format!("{{{{ value_json.{field} }}}}"),
                "icon": icon,
                "device": device
            });
            if field == "last_check" {
                config["device_class"] = json!("timestamp");
            }
            (format!("{DISCOVERY_PREFIX}/smartschool_{id}_{suffix}/config"), config)
        })
        .collect()
}

/// State message: today's homework count, a readable summary, and the
/// check time.
pub fn state_payload(student: &str, items: &[HomeworkItem], now: DateTime<Local>) -> Value {
    let today = now.date_naive();
    let todays: Vec<&HomeworkItem> = items.iter().filter(|i| i.date == today).collect();
    json!({
        "count": todays.len(),
        "details": details(student, &todays, today),
        "last_check": now.to_rfc3339()
    })
}

fn details(student: &str, items: &[&HomeworkItem], today: NaiveDate) -> String {
    if items.is_empty() {
        return format!("No homework for today ({today})");
    }
    let mut out = format!("Today's homework for {student}:\n\n");
    for (idx, item) in items.iter().enumerate() {
        out.push_str(&format!("{}. {} - {}\n", idx + 1, item.subject, item.teacher));
        let text: String = item.body.chars().take(MAX_DETAIL_CHARS).collect();
        out.push_str(&format!("   {text}\n"));
        if item.body.chars().count() > MAX_DETAIL_CHARS {
            out.push_str("   ...\n");
        }
        out.push('\n');
    }
    out
}
