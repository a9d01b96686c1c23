//! Mongo-backed `StoreGateway`. Collections mirror the original agent's
//! schema: `machines`, `jobs`, `job_runs`, `commands`, `notification_configs`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime};
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};

use crate::error::StoreError;
use crate::types::{Command, Job, JobRun, Machine, NotificationConfig};

use super::StoreGateway;

pub struct MongoStore {
    db: Database,
    order_field_aliases: Vec<String>,
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str, order_field_aliases: Vec<String>) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| StoreError::Fatal(e.to_string()))?;
        Ok(Self {
            db: client.database(db_name),
            order_field_aliases,
        })
    }

    fn machines(&self) -> Collection<mongodb::bson::Document> {
        self.db.collection("machines")
    }
    fn jobs(&self) -> Collection<mongodb::bson::Document> {
        self.db.collection("jobs")
    }
    fn job_runs(&self) -> Collection<mongodb::bson::Document> {
        self.db.collection("job_runs")
    }
    fn commands(&self) -> Collection<mongodb::bson::Document> {
        self.db.collection("commands")
    }
    fn notification_configs(&self) -> Collection<mongodb::bson::Document> {
        self.db.collection("notification_configs")
    }

    fn order_field_map(&self, order_value: i64) -> mongodb::bson::Document {
        let mut d = mongodb::bson::Document::new();
        for key in &self.order_field_aliases {
            d.insert(key, order_value);
        }
        d
    }

    fn extract_order_value(doc: &mongodb::bson::Document, aliases: &[String]) -> i64 {
        for key in aliases {
            if let Ok(v) = doc.get_i64(key) {
                return v;
            }
            if let Ok(v) = doc.get_i32(key) {
                return v as i64;
            }
        }
        9999
    }

    fn doc_to_machine(doc: &mongodb::bson::Document, aliases: &[String]) -> Machine {
        Machine {
            machine_id: doc.get_str("machine_id").unwrap_or_default().to_string(),
            hostname: doc.get_str("hostname").unwrap_or_default().to_string(),
            order_value: Self::extract_order_value(doc, aliases),
            last_online_minute: doc
                .get_datetime("last_online_minute")
                .ok()
                .map(|d| d.to_chrono()),
            last_seen: doc.get_datetime("last_seen").ok().map(|d| d.to_chrono()),
        }
    }
}

#[async_trait]
impl StoreGateway for MongoStore {
    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = IndexOptions::builder().unique(true).build();

        self.machines()
            .create_index(
                IndexModel::builder()
                    .keys(doc! {"machine_id": 1})
                    .options(unique.clone())
                    .build(),
            )
            .await
            .map_err(|e| StoreError::Fatal(e.to_string()))?;

        for key in &self.order_field_aliases {
            self.machines()
                .create_index(IndexModel::builder().keys(doc! {key.as_str(): 1}).build())
                .await
                .map_err(|e| StoreError::Fatal(e.to_string()))?;
        }

        self.machines()
            .create_index(IndexModel::builder().keys(doc! {"last_online_minute": 1}).build())
            .await
            .map_err(|e| StoreError::Fatal(e.to_string()))?;

        self.jobs()
            .create_index(
                IndexModel::builder()
                    .keys(doc! {"enabled": 1, "hour": 1, "minute": 1})
                    .build(),
            )
            .await
            .map_err(|e| StoreError::Fatal(e.to_string()))?;

        self.jobs()
            .create_index(
                IndexModel::builder()
                    .keys(doc! {"enabled": 1, "schedules.hour": 1, "schedules.minute": 1})
                    .build(),
            )
            .await
            .map_err(|e| StoreError::Fatal(e.to_string()))?;

        self.job_runs()
            .create_index(
                IndexModel::builder()
                    .keys(doc! {"job_id": 1, "scheduled_for": 1})
                    .options(unique)
                    .build(),
            )
            .await
            .map_err(|e| StoreError::Fatal(e.to_string()))?;

        self.commands()
            .create_index(IndexModel::builder().keys(doc! {"created_at": 1}).build())
            .await
            .map_err(|e| StoreError::Fatal(e.to_string()))?;

        self.commands()
            .create_index(
                IndexModel::builder()
                    .keys(doc! {"target": 1, "created_at": 1})
                    .build(),
            )
            .await
            .map_err(|e| StoreError::Fatal(e.to_string()))?;

        Ok(())
    }

    async fn ensure_machine(
        &self,
        machine_id: &str,
        hostname: &str,
        default_order_value: i64,
    ) -> Result<Machine, StoreError> {
        let now = BsonDateTime::from_chrono(Utc::now());
        let mut set_on_insert = doc! {
            "machine_id": machine_id,
            "created_at": now,
        };
        set_on_insert.extend(self.order_field_map(default_order_value));

        let update = doc! {
            "$set": {"hostname": hostname, "last_seen": now},
            "$setOnInsert": set_on_insert,
        };

        let opts = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let found = self
            .machines()
            .find_one_and_update(doc! {"machine_id": machine_id}, update)
            .with_options(opts)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?
            .ok_or_else(|| StoreError::Fatal("upsert returned no document".to_string()))?;

        let order_value = Self::extract_order_value(&found, &self.order_field_aliases);
        let desired = self.order_field_map(order_value);
        let mut diff = mongodb::bson::Document::new();
        for (k, v) in desired.iter() {
            if found.get(k) != Some(v) {
                diff.insert(k, v.clone());
            }
        }
        if !diff.is_empty() {
            self.machines()
                .update_one(doc! {"machine_id": machine_id}, doc! {"$set": diff})
                .await
                .map_err(|e| StoreError::Transient(e.to_string()))?;
        }

        Ok(Self::doc_to_machine(&found, &self.order_field_aliases))
    }

    async fn update_heartbeat(&self, machine_id: &str, minute: DateTime<Utc>) -> Result<(), StoreError> {
        let now = BsonDateTime::from_chrono(Utc::now());
        self.machines()
            .update_one(
                doc! {"machine_id": machine_id},
                doc! {"$set": {
                    "last_online_minute": BsonDateTime::from_chrono(minute),
                    "last_seen": now,
                }},
            )
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn list_machines_sorted(&self) -> Result<Vec<Machine>, StoreError> {
        use futures_util::TryStreamExt;
        let mut cursor = self
            .machines()
            .find(doc! {})
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        let mut machines = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?
        {
            machines.push(Self::doc_to_machine(&doc, &self.order_field_aliases));
        }
        machines.sort_by(|a, b| a.order_value.cmp(&b.order_value).then(a.machine_id.cmp(&b.machine_id)));
        Ok(machines)
    }

    async fn claim_run(
        &self,
        job_id: &str,
        scheduled_for: DateTime<Utc>,
        machine_id: &str,
        order_value: i64,
        order_position: usize,
    ) -> Result<bool, StoreError> {
        let scheduled_bson = BsonDateTime::from_chrono(scheduled_for);
        let now = BsonDateTime::from_chrono(Utc::now());

        let filter = doc! {
            "job_id": job_id,
            "scheduled_for": scheduled_bson,
            "$or": [{"claimed_by": Bson::Null}, {"claimed_by": machine_id}],
        };
        let update = doc! {
            "$setOnInsert": {"job_id": job_id, "scheduled_for": scheduled_bson},
            "$set": {
                "claimed_by": machine_id,
                "claimed_at": now,
                "executed_order_value": order_value,
                "executed_order_position": order_position as i64,
                "status": "running",
                "steps": [],
            },
        };
        let opts = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        match self
            .job_runs()
            .find_one_and_update(filter, update)
            .with_options(opts)
            .await
        {
            Ok(Some(doc)) => Ok(doc.get_str("claimed_by").ok() == Some(machine_id)),
            Ok(None) => Ok(false),
            Err(e) => {
                if e.to_string().contains("E11000") {
                    Ok(false)
                } else {
                    Err(StoreError::Transient(e.to_string()))
                }
            }
        }
    }

    async fn finalize_run(&self, run: &JobRun) -> Result<(), StoreError> {
        let steps_bson: Vec<Bson> = run
            .steps
            .iter()
            .map(|s| mongodb::bson::to_bson(s).unwrap_or(Bson::Null))
            .collect();
        let status_str = match run.status {
            crate::types::RunStatus::Running => "running",
            crate::types::RunStatus::Ok => "ok",
            crate::types::RunStatus::Error => "error",
        };
        self.job_runs()
            .update_one(
                doc! {
                    "job_id": &run.job_id,
                    "scheduled_for": BsonDateTime::from_chrono(run.scheduled_for),
                },
                doc! {"$set": {
                    "status": status_str,
                    "steps": steps_bson,
                    "start_at": run.start_at.map(BsonDateTime::from_chrono),
                    "end_at": run.end_at.map(BsonDateTime::from_chrono),
                }},
            )
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn list_enabled_jobs(&self) -> Result<Vec<Job>, StoreError> {
        use futures_util::TryStreamExt;
        let mut cursor = self
            .jobs()
            .clone_with_type::<Job>()
            .find(doc! {"enabled": true})
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        let mut jobs = Vec::new();
        while let Some(job) = cursor
            .try_next()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?
        {
            jobs.push(job);
        }
        Ok(jobs)
    }

    async fn poll_commands_since(
        &self,
        machine_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Command>, StoreError> {
        use futures_util::TryStreamExt;
        let filter = match since {
            Some(ts) => doc! {
                "target": {"$in": [machine_id, "all"]},
                "created_at": {"$gt": BsonDateTime::from_chrono(ts)},
            },
            None => doc! {"target": {"$in": [machine_id, "all"]}},
        };
        let mut cursor = self
            .commands()
            .clone_with_type::<Command>()
            .find(filter)
            .sort(doc! {"created_at": 1})
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        let mut commands = Vec::new();
        while let Some(cmd) = cursor
            .try_next()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?
        {
            commands.push(cmd);
        }
        Ok(commands)
    }

    async fn submit_command(&self, command: &Command) -> Result<(), StoreError> {
        let bson = mongodb::bson::to_document(command)
            .map_err(|e| StoreError::Fatal(e.to_string()))?;
        self.commands()
            .insert_one(bson)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn get_notification_config(&self) -> Result<Option<NotificationConfig>, StoreError> {
        let doc = self
            .notification_configs()
            .clone_with_type::<NotificationConfig>()
            .find_one(doc! {})
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(doc)
    }
}
