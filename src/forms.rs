//! Modal-driven CRUD forms for machines, sensors, models and limits.
//!
//! The forms layer never talks to a network: it writes through a
//! [`DataBackend`] seam, and the shipped [`MemoryBackend`] simulates the
//! server with seeded in-memory tables.  Successful mutations emit
//! `RECORD_*` events and a success toast; validation failures surface as an
//! error toast and a `None` return, never a panic.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::events::{DashEvent, EventController, EventKind, RecordMeta};
use crate::limits::{LimitConfig, StatsPatch};
use crate::notify::NotifyController;
use crate::state::StateStore;

/// Entity tables the forms operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Machine,
    Sensor,
    Model,
    Limits,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Machine => "machine",
            EntityKind::Sensor => "sensor",
            EntityKind::Model => "model",
            EntityKind::Limits => "limits",
        };
        write!(f, "{}", s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entities
// ─────────────────────────────────────────────────────────────────────────────

/// A monitored machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
    /// Sensor mounted on this machine, if any.
    pub sensor_id: Option<u64>,
}

/// A vibration sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
    pub machine_id: Option<u64>,
    /// Prediction model assigned to this sensor, if any.
    pub model_id: Option<u64>,
}

/// A prediction model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlModel {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
}

/// Form contents for creating (`id: None`) or updating a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineDraft {
    pub id: Option<u64>,
    pub name: String,
    pub description: Option<String>,
    pub sensor_id: Option<u64>,
}

/// Form contents for creating or updating a sensor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorDraft {
    pub id: Option<u64>,
    pub name: String,
    pub description: Option<String>,
    pub machine_id: Option<u64>,
    pub model_id: Option<u64>,
}

/// Form contents for creating or updating a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelDraft {
    pub id: Option<u64>,
    pub name: String,
    pub description: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// DataBackend
// ─────────────────────────────────────────────────────────────────────────────

/// Storage seam for the forms layer.  All operations are synchronous; unknown
/// ids answer `None`/`false`.
pub trait DataBackend: Send + Sync {
    fn machines(&self) -> Vec<Machine>;
    fn machine(&self, id: u64) -> Option<Machine>;
    fn create_machine(&self, draft: &MachineDraft) -> Machine;
    fn update_machine(&self, id: u64, draft: &MachineDraft) -> Option<Machine>;
    fn delete_machine(&self, id: u64) -> bool;

    fn sensors(&self) -> Vec<Sensor>;
    fn sensor(&self, id: u64) -> Option<Sensor>;
    fn create_sensor(&self, draft: &SensorDraft) -> Sensor;
    fn update_sensor(&self, id: u64, draft: &SensorDraft) -> Option<Sensor>;
    fn delete_sensor(&self, id: u64) -> bool;

    fn models(&self) -> Vec<MlModel>;
    fn model(&self, id: u64) -> Option<MlModel>;
    fn create_model(&self, draft: &ModelDraft) -> MlModel;
    fn update_model(&self, id: u64, draft: &ModelDraft) -> Option<MlModel>;
    fn delete_model(&self, id: u64) -> bool;

    fn latest_limits(&self) -> LimitConfig;
    fn save_limits(&self, limits: LimitConfig);
}

struct MemoryTables {
    machines: BTreeMap<u64, Machine>,
    sensors: BTreeMap<u64, Sensor>,
    models: BTreeMap<u64, MlModel>,
    limits: LimitConfig,
    next_machine: u64,
    next_sensor: u64,
    next_model: u64,
}

/// In-memory [`DataBackend`] seeded like the demo database: one model, one
/// machine, one sensor, factory limits.
pub struct MemoryBackend {
    inner: Mutex<MemoryTables>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        let mut machines = BTreeMap::new();
        let mut sensors = BTreeMap::new();
        let mut models = BTreeMap::new();

        models.insert(
            1,
            MlModel {
                id: 1,
                name: "Modelo RNN Multiclase".to_string(),
                description: Some("Clasificación de severidad de vibraciones".to_string()),
            },
        );
        machines.insert(
            1,
            Machine {
                id: 1,
                name: "Máquina 1".to_string(),
                description: Some("Bomba centrífuga".to_string()),
                sensor_id: Some(1),
            },
        );
        sensors.insert(
            1,
            Sensor {
                id: 1,
                name: "Sensor 1".to_string(),
                description: Some("Acelerómetro triaxial".to_string()),
                machine_id: Some(1),
                model_id: Some(1),
            },
        );

        Arc::new(Self {
            inner: Mutex::new(MemoryTables {
                machines,
                sensors,
                models,
                limits: LimitConfig::default(),
                next_machine: 2,
                next_sensor: 2,
                next_model: 2,
            }),
        })
    }

    /// Empty backend (no seed rows); useful for tests.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(MemoryTables {
                machines: BTreeMap::new(),
                sensors: BTreeMap::new(),
                models: BTreeMap::new(),
                limits: LimitConfig::default(),
                next_machine: 1,
                next_sensor: 1,
                next_model: 1,
            }),
        })
    }
}

impl DataBackend for MemoryBackend {
    fn machines(&self) -> Vec<Machine> {
        self.inner.lock().unwrap().machines.values().cloned().collect()
    }

    fn machine(&self, id: u64) -> Option<Machine> {
        self.inner.lock().unwrap().machines.get(&id).cloned()
    }

    fn create_machine(&self, draft: &MachineDraft) -> Machine {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_machine;
        inner.next_machine += 1;
        let machine = Machine {
            id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            sensor_id: draft.sensor_id,
        };
        inner.machines.insert(id, machine.clone());
        machine
    }

    fn update_machine(&self, id: u64, draft: &MachineDraft) -> Option<Machine> {
        let mut inner = self.inner.lock().unwrap();
        let machine = inner.machines.get_mut(&id)?;
        machine.name = draft.name.clone();
        machine.description = draft.description.clone();
        machine.sensor_id = draft.sensor_id;
        Some(machine.clone())
    }

    fn delete_machine(&self, id: u64) -> bool {
        self.inner.lock().unwrap().machines.remove(&id).is_some()
    }

    fn sensors(&self) -> Vec<Sensor> {
        self.inner.lock().unwrap().sensors.values().cloned().collect()
    }

    fn sensor(&self, id: u64) -> Option<Sensor> {
        self.inner.lock().unwrap().sensors.get(&id).cloned()
    }

    fn create_sensor(&self, draft: &SensorDraft) -> Sensor {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_sensor;
        inner.next_sensor += 1;
        let sensor = Sensor {
            id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            machine_id: draft.machine_id,
            model_id: draft.model_id,
        };
        inner.sensors.insert(id, sensor.clone());
        sensor
    }

    fn update_sensor(&self, id: u64, draft: &SensorDraft) -> Option<Sensor> {
        let mut inner = self.inner.lock().unwrap();
        let sensor = inner.sensors.get_mut(&id)?;
        sensor.name = draft.name.clone();
        sensor.description = draft.description.clone();
        sensor.machine_id = draft.machine_id;
        sensor.model_id = draft.model_id;
        Some(sensor.clone())
    }

    fn delete_sensor(&self, id: u64) -> bool {
        self.inner.lock().unwrap().sensors.remove(&id).is_some()
    }

    fn models(&self) -> Vec<MlModel> {
        self.inner.lock().unwrap().models.values().cloned().collect()
    }

    fn model(&self, id: u64) -> Option<MlModel> {
        self.inner.lock().unwrap().models.get(&id).cloned()
    }

    fn create_model(&self, draft: &ModelDraft) -> MlModel {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_model;
        inner.next_model += 1;
        let model = MlModel {
            id,
            name: draft.name.clone(),
            description: draft.description.clone(),
        };
        inner.models.insert(id, model.clone());
        model
    }

    fn update_model(&self, id: u64, draft: &ModelDraft) -> Option<MlModel> {
        let mut inner = self.inner.lock().unwrap();
        let model = inner.models.get_mut(&id)?;
        model.name = draft.name.clone();
        model.description = draft.description.clone();
        Some(model.clone())
    }

    fn delete_model(&self, id: u64) -> bool {
        self.inner.lock().unwrap().models.remove(&id).is_some()
    }

    fn latest_limits(&self) -> LimitConfig {
        self.inner.lock().unwrap().limits
    }

    fn save_limits(&self, limits: LimitConfig) {
        self.inner.lock().unwrap().limits = limits;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FormController
// ─────────────────────────────────────────────────────────────────────────────

/// Drives the CRUD modals: validates drafts, writes through the backend,
/// emits `RECORD_*` events and toasts.
#[derive(Clone)]
pub struct FormController {
    backend: Arc<dyn DataBackend>,
    state: StateStore,
    events: EventController,
    notify: NotifyController,
}

impl FormController {
    pub fn new(
        backend: Arc<dyn DataBackend>,
        state: StateStore,
        notify: NotifyController,
    ) -> Self {
        let events = state.events().clone();
        Self {
            backend,
            state,
            events,
            notify,
        }
    }

    pub fn backend(&self) -> &Arc<dyn DataBackend> {
        &self.backend
    }

    fn valid_name(&self, name: &str, entity: EntityKind) -> bool {
        if name.trim().is_empty() {
            warn!("{} form rejected: empty name", entity);
            self.notify.error(format!("{} name is required", entity));
            return false;
        }
        true
    }

    fn emit_record(&self, kind: EventKind, entity: EntityKind, id: u64, name: Option<String>) {
        let mut evt = DashEvent::new(kind);
        evt.record = Some(RecordMeta { entity, id, name });
        self.events.emit(evt);
    }

    // ── Machines ────────────────────────────────────────────────────────

    /// Create (`draft.id == None`) or update a machine.
    pub fn submit_machine(&self, draft: &MachineDraft) -> Option<Machine> {
        if !self.valid_name(&draft.name, EntityKind::Machine) {
            return None;
        }
        match draft.id {
            None => {
                let machine = self.backend.create_machine(draft);
                self.emit_record(
                    EventKind::RECORD_CREATED,
                    EntityKind::Machine,
                    machine.id,
                    Some(machine.name.clone()),
                );
                self.notify.success(format!("Machine '{}' created", machine.name));
                Some(machine)
            }
            Some(id) => match self.backend.update_machine(id, draft) {
                Some(machine) => {
                    self.emit_record(
                        EventKind::RECORD_UPDATED,
                        EntityKind::Machine,
                        machine.id,
                        Some(machine.name.clone()),
                    );
                    self.notify.success(format!("Machine '{}' updated", machine.name));
                    Some(machine)
                }
                None => {
                    warn!("machine update rejected: unknown id {}", id);
                    self.notify.error("Machine not found");
                    None
                }
            },
        }
    }

    pub fn delete_machine(&self, id: u64) -> bool {
        if self.backend.delete_machine(id) {
            self.emit_record(EventKind::RECORD_DELETED, EntityKind::Machine, id, None);
            self.notify.success("Machine deleted");
            true
        } else {
            warn!("machine delete rejected: unknown id {}", id);
            false
        }
    }

    /// List machines behind the loading gate.
    pub fn load_machines(&self) -> Vec<Machine> {
        self.notify.begin_loading(Some("Loading machines"));
        let machines = self.backend.machines();
        self.notify.finish_loading();
        machines
    }

    // ── Sensors ─────────────────────────────────────────────────────────

    pub fn submit_sensor(&self, draft: &SensorDraft) -> Option<Sensor> {
        if !self.valid_name(&draft.name, EntityKind::Sensor) {
            return None;
        }
        match draft.id {
            None => {
                let sensor = self.backend.create_sensor(draft);
                self.emit_record(
                    EventKind::RECORD_CREATED,
                    EntityKind::Sensor,
                    sensor.id,
                    Some(sensor.name.clone()),
                );
                self.notify.success(format!("Sensor '{}' created", sensor.name));
                Some(sensor)
            }
            Some(id) => match self.backend.update_sensor(id, draft) {
                Some(sensor) => {
                    self.emit_record(
                        EventKind::RECORD_UPDATED,
                        EntityKind::Sensor,
                        sensor.id,
                        Some(sensor.name.clone()),
                    );
                    self.notify.success(format!("Sensor '{}' updated", sensor.name));
                    Some(sensor)
                }
                None => {
                    warn!("sensor update rejected: unknown id {}", id);
                    self.notify.error("Sensor not found");
                    None
                }
            },
        }
    }

    pub fn delete_sensor(&self, id: u64) -> bool {
        if self.backend.delete_sensor(id) {
            self.emit_record(EventKind::RECORD_DELETED, EntityKind::Sensor, id, None);
            self.notify.success("Sensor deleted");
            true
        } else {
            warn!("sensor delete rejected: unknown id {}", id);
            false
        }
    }

    pub fn load_sensors(&self) -> Vec<Sensor> {
        self.notify.begin_loading(Some("Loading sensors"));
        let sensors = self.backend.sensors();
        self.notify.finish_loading();
        sensors
    }

    // ── Models ──────────────────────────────────────────────────────────

    pub fn submit_model(&self, draft: &ModelDraft) -> Option<MlModel> {
        if !self.valid_name(&draft.name, EntityKind::Model) {
            return None;
        }
        match draft.id {
            None => {
                let model = self.backend.create_model(draft);
                self.emit_record(
                    EventKind::RECORD_CREATED,
                    EntityKind::Model,
                    model.id,
                    Some(model.name.clone()),
                );
                self.notify.success(format!("Model '{}' created", model.name));
                Some(model)
            }
            Some(id) => match self.backend.update_model(id, draft) {
                Some(model) => {
                    self.emit_record(
                        EventKind::RECORD_UPDATED,
                        EntityKind::Model,
                        model.id,
                        Some(model.name.clone()),
                    );
                    self.notify.success(format!("Model '{}' updated", model.name));
                    Some(model)
                }
                None => {
                    warn!("model update rejected: unknown id {}", id);
                    self.notify.error("Model not found");
                    None
                }
            },
        }
    }

    pub fn delete_model(&self, id: u64) -> bool {
        if self.backend.delete_model(id) {
            self.emit_record(EventKind::RECORD_DELETED, EntityKind::Model, id, None);
            self.notify.success("Model deleted");
            true
        } else {
            warn!("model delete rejected: unknown id {}", id);
            false
        }
    }

    // ── Limits ──────────────────────────────────────────────────────────

    /// Apply the limits form: merges through the state store (single write
    /// path for stats), persists the flattened shape to the backend on
    /// success.
    pub fn submit_limits(&self, patch: StatsPatch) -> Option<LimitConfig> {
        match self.state.update_stats(patch) {
            Some(merged) => {
                let cfg = merged.to_limit_config();
                self.backend.save_limits(cfg);
                self.emit_record(EventKind::RECORD_UPDATED, EntityKind::Limits, 0, None);
                self.notify.success("Limits updated");
                Some(cfg)
            }
            None => {
                self.notify.error("Invalid limits");
                None
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventFilter;
    use crate::limits::{AxisPatch, Band};

    fn controller() -> (FormController, StateStore) {
        let events = EventController::new();
        let state = StateStore::new(events.clone());
        let notify = NotifyController::new(events);
        let forms = FormController::new(MemoryBackend::new(), state.clone(), notify);
        (forms, state)
    }

    #[test]
    fn seeded_backend_has_demo_rows() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.machines().len(), 1);
        assert_eq!(backend.sensors().len(), 1);
        assert_eq!(backend.models().len(), 1);
        assert_eq!(backend.machine(1).unwrap().name, "Máquina 1");
    }

    #[test]
    fn create_machine_assigns_monotonic_ids() {
        let (forms, _) = controller();
        let a = forms
            .submit_machine(&MachineDraft {
                name: "Compresor".into(),
                ..Default::default()
            })
            .unwrap();
        let b = forms
            .submit_machine(&MachineDraft {
                name: "Ventilador".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(a.id, 2);
        assert_eq!(b.id, 3);
    }

    #[test]
    fn empty_name_is_rejected_with_toast() {
        let (forms, state) = controller();
        let rx = state
            .events()
            .subscribe(EventFilter::only(EventKind::TOAST_SHOWN));

        assert!(forms
            .submit_machine(&MachineDraft {
                name: "   ".into(),
                ..Default::default()
            })
            .is_none());

        let evt = rx.try_recv().unwrap();
        assert_eq!(evt.toast.unwrap().level, crate::notify::ToastLevel::Error);
    }

    #[test]
    fn update_unknown_machine_fails() {
        let (forms, _) = controller();
        assert!(forms
            .submit_machine(&MachineDraft {
                id: Some(99),
                name: "Fantasma".into(),
                ..Default::default()
            })
            .is_none());
    }

    #[test]
    fn submit_emits_record_events() {
        let (forms, state) = controller();
        let rx = state.events().subscribe(EventFilter::only(
            EventKind::RECORD_CREATED | EventKind::RECORD_UPDATED | EventKind::RECORD_DELETED,
        ));

        let sensor = forms
            .submit_sensor(&SensorDraft {
                name: "Sensor eje Y".into(),
                machine_id: Some(1),
                ..Default::default()
            })
            .unwrap();
        forms.submit_sensor(&SensorDraft {
            id: Some(sensor.id),
            name: "Sensor eje Y (v2)".into(),
            machine_id: Some(1),
            ..Default::default()
        });
        forms.delete_sensor(sensor.id);

        let kinds: Vec<EventKind> = rx.try_iter().map(|e| e.kinds).collect();
        assert!(kinds[0].contains(EventKind::RECORD_CREATED));
        assert!(kinds[1].contains(EventKind::RECORD_UPDATED));
        assert!(kinds[2].contains(EventKind::RECORD_DELETED));
    }

    #[test]
    fn submit_limits_goes_through_the_store() {
        let (forms, state) = controller();
        let cfg = forms
            .submit_limits(StatsPatch {
                x: Some(AxisPatch {
                    sigma2: Some(Band::new(-1.5, 1.5)),
                    sigma3: None,
                }),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(cfg.x_2inf, -1.5);
        assert_eq!(cfg.x_2sup, 1.5);
        // Store and backend agree.
        assert_eq!(state.snapshot().stats.to_limit_config(), cfg);
        assert_eq!(forms.backend().latest_limits(), cfg);
    }

    #[test]
    fn submit_invalid_limits_is_rejected() {
        let (forms, state) = controller();
        let before = forms.backend().latest_limits();
        assert!(forms.submit_limits(StatsPatch::default()).is_none());
        assert_eq!(forms.backend().latest_limits(), before);
        assert_eq!(state.snapshot().stats.to_limit_config(), before);
    }

    #[test]
    fn load_machines_uses_loading_gate() {
        let (forms, state) = controller();
        let rx = state.events().subscribe(EventFilter::only(
            EventKind::LOADING_STARTED | EventKind::LOADING_FINISHED,
        ));
        let machines = forms.load_machines();
        assert_eq!(machines.len(), 1);
        let kinds: Vec<EventKind> = rx.try_iter().map(|e| e.kinds).collect();
        assert_eq!(kinds.len(), 2);
    }
}
