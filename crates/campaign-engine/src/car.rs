//! 车辆记录
//!
//! 演示用的记录类型以及一组内置活动规则，供命令行和测试使用。

use crate::models::Campaign;
use crate::record::{FieldKind, Record, RecordSchema};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 车主
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub id: i32,
    pub name: String,
    pub age: i32,
}

impl Record for Owner {
    fn schema() -> RecordSchema<Self> {
        RecordSchema::<Self>::new("Owner")
            .field("ID", FieldKind::Integer, |o| o.id.into())
            .field("Name", FieldKind::String, |o| (&o.name).into())
            .field("Age", FieldKind::Integer, |o| o.age.into())
    }
}

/// 车辆
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Car {
    pub make: String,
    pub year: i32,
    pub model_type: String,
    pub vin: String,
    pub price: f64,
    pub owner: Option<Owner>,
}

impl Record for Car {
    fn schema() -> RecordSchema<Self> {
        RecordSchema::<Self>::new("Car")
            .field("Make", FieldKind::String, |c| (&c.make).into())
            .field("Year", FieldKind::Integer, |c| c.year.into())
            .field("Type", FieldKind::String, |c| (&c.model_type).into())
            .field("VIN", FieldKind::String, |c| (&c.vin).into())
            .field("Price", FieldKind::Decimal, |c| c.price.into())
            .nested("Owner", |c| c.owner.as_ref())
    }
}

/// 内置演示活动，有效期为 `now` 前后 30 天
pub fn demo_campaigns(now: DateTime<Utc>) -> Vec<Campaign> {
    let valid_from = now - Duration::days(30);
    let valid_to = now + Duration::days(30);

    vec![
        Campaign::new(
            "Toyota SUV Campaign",
            r#"Make == "Toyota" && Type == "SUV" && Year >= 2020 && Owner.ID == 15"#,
            valid_from,
            valid_to,
        )
        .with_id("1"),
        Campaign::new(
            "Honda Sedan Campaign",
            r#"Make == "Honda" && Type == "Sedan" && Price <= 30000 && Owner.ID == 15"#,
            valid_from,
            valid_to,
        )
        .with_id("2"),
    ]
}
