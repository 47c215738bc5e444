use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{info, warn};

use super::Store;
use crate::auth::repo_types::User;
use crate::traveler::query::SpotFilter;
use crate::traveler::repo_types::{
    normalize_ids, Attribute, AttributeKind, Spot, SpotChanges, SpotDraft, SpotLookup, SpotRow,
};

const SPOT_COLUMNS: &str = "s.id, s.user_id, s.title, s.time_minutes, s.price, s.link, s.image";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Connects and applies pending migrations.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            warn!(error = %e, "migration failed; continuing");
        } else {
            info!("migrations applied");
        }
        Ok(Self::new(db))
    }

    async fn load_one(&self, row: Option<SpotRow>) -> anyhow::Result<Option<Spot>> {
        let Some(row) = row else { return Ok(None) };
        let mut conn = self.db.acquire().await.context("acquire connection")?;
        Ok(load_links(&mut conn, vec![row]).await?.pop())
    }
}

/// Fills the link lists of `rows` with one query per attribute kind.
async fn load_links(conn: &mut PgConnection, rows: Vec<SpotRow>) -> anyhow::Result<Vec<Spot>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut spots: Vec<Spot> = rows.into_iter().map(Spot::from_row).collect();
    if ids.is_empty() {
        return Ok(spots);
    }
    let index: HashMap<i64, usize> = spots.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
    for kind in AttributeKind::ALL {
        let sql = format!(
            "SELECT spot_id, {col} FROM {link} WHERE spot_id = ANY($1) ORDER BY {col}",
            col = kind.link_column(),
            link = kind.link_table(),
        );
        let links: Vec<(i64, i64)> = sqlx::query_as(&sql)
            .bind(&ids)
            .fetch_all(&mut *conn)
            .await
            .with_context(|| format!("load {}", kind.link_table()))?;
        for (spot_id, attr_id) in links {
            if let Some(&i) = index.get(&spot_id) {
                spots[i].links_mut(kind).push(attr_id);
            }
        }
    }
    Ok(spots)
}

async fn replace_links_tx(
    tx: &mut Transaction<'_, Postgres>,
    kind: AttributeKind,
    spot_id: i64,
    ids: &[i64],
) -> anyhow::Result<()> {
    sqlx::query(&format!("DELETE FROM {} WHERE spot_id = $1", kind.link_table()))
        .bind(spot_id)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("clear {}", kind.link_table()))?;
    let ids = normalize_ids(ids);
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query(&format!(
        "INSERT INTO {} (spot_id, {}) SELECT $1, UNNEST($2::BIGINT[])",
        kind.link_table(),
        kind.link_column()
    ))
    .bind(spot_id)
    .bind(&ids)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("insert {}", kind.link_table()))?;
    Ok(())
}

async fn fetch_spot_row_tx(
    tx: &mut Transaction<'_, Postgres>,
    owner: i64,
    id: i64,
) -> anyhow::Result<Option<SpotRow>> {
    let row = sqlx::query_as::<_, SpotRow>(&format!(
        "SELECT {SPOT_COLUMNS} FROM spots s WHERE s.id = $1 AND s.user_id = $2 FOR UPDATE"
    ))
    .bind(id)
    .bind(owner)
    .fetch_optional(&mut **tx)
    .await
    .context("lock spot")?;
    Ok(row)
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(
        &self,
        email: &str,
        name: &str,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, name, password_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO NOTHING
            RETURNING id, email, name, password_hash, created_at
            "#,
        )
        .bind(email)
        .bind(name)
        .bind(password_hash)
        .fetch_optional(&self.db)
        .await
        .context("insert user")?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, password_hash, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_user(&self, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, email, name, password_hash, created_at FROM users WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn list_attributes(
        &self,
        kind: AttributeKind,
        owner: i64,
        assigned_only: bool,
    ) -> anyhow::Result<Vec<Attribute>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT a.id, a.user_id, a.name FROM {} a WHERE a.user_id = ",
            kind.table()
        ));
        qb.push_bind(owner);
        if assigned_only {
            qb.push(format!(
                " AND EXISTS (SELECT 1 FROM {link} l WHERE l.{col} = a.id)",
                link = kind.link_table(),
                col = kind.link_column(),
            ));
        }
        qb.push(" ORDER BY a.name COLLATE \"C\" DESC, a.id DESC");
        let rows = qb
            .build_query_as::<Attribute>()
            .fetch_all(&self.db)
            .await
            .with_context(|| format!("list {}", kind.table()))?;
        Ok(rows)
    }

    async fn create_attribute(
        &self,
        kind: AttributeKind,
        owner: i64,
        name: &str,
    ) -> anyhow::Result<Attribute> {
        let row = sqlx::query_as::<_, Attribute>(&format!(
            "INSERT INTO {} (user_id, name) VALUES ($1, $2) RETURNING id, user_id, name",
            kind.table()
        ))
        .bind(owner)
        .bind(name)
        .fetch_one(&self.db)
        .await
        .with_context(|| format!("insert into {}", kind.table()))?;
        Ok(row)
    }

    async fn owned_attributes(
        &self,
        kind: AttributeKind,
        owner: i64,
        ids: &[i64],
    ) -> anyhow::Result<Vec<Attribute>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, Attribute>(&format!(
            "SELECT id, user_id, name FROM {} WHERE user_id = $1 AND id = ANY($2) ORDER BY id",
            kind.table()
        ))
        .bind(owner)
        .bind(ids)
        .fetch_all(&self.db)
        .await
        .with_context(|| format!("load {}", kind.table()))?;
        Ok(rows)
    }

    async fn list_spots(&self, owner: i64, filter: &SpotFilter) -> anyhow::Result<Vec<Spot>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {SPOT_COLUMNS} FROM spots s WHERE s.user_id = "
        ));
        qb.push_bind(owner);
        for (kind, ids) in filter.dimensions() {
            qb.push(format!(
                " AND EXISTS (SELECT 1 FROM {link} l WHERE l.spot_id = s.id AND l.{col} = ANY(",
                link = kind.link_table(),
                col = kind.link_column(),
            ));
            qb.push_bind(ids.to_vec());
            qb.push("))");
        }
        qb.push(" ORDER BY s.id DESC");
        let rows = qb
            .build_query_as::<SpotRow>()
            .fetch_all(&self.db)
            .await
            .context("list spots")?;
        let mut conn = self.db.acquire().await.context("acquire connection")?;
        load_links(&mut conn, rows).await
    }

    async fn find_spot(&self, owner: i64, lookup: SpotLookup<'_>) -> anyhow::Result<Option<Spot>> {
        let row = match lookup {
            SpotLookup::Id(id) => {
                sqlx::query_as::<_, SpotRow>(&format!(
                    "SELECT {SPOT_COLUMNS} FROM spots s WHERE s.id = $1 AND s.user_id = $2"
                ))
                .bind(id)
                .bind(owner)
                .fetch_optional(&self.db)
                .await
            }
            SpotLookup::Title(title) => {
                sqlx::query_as::<_, SpotRow>(&format!(
                    "SELECT {SPOT_COLUMNS} FROM spots s WHERE s.title = $1 AND s.user_id = $2 \
                     ORDER BY s.id DESC LIMIT 1"
                ))
                .bind(title)
                .bind(owner)
                .fetch_optional(&self.db)
                .await
            }
        }
        .context("find spot")?;
        self.load_one(row).await
    }

    async fn insert_spot(&self, owner: i64, draft: &SpotDraft) -> anyhow::Result<Spot> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        let row = sqlx::query_as::<_, SpotRow>(
            r#"
            INSERT INTO spots (user_id, title, time_minutes, price, link)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, title, time_minutes, price, link, image
            "#,
        )
        .bind(owner)
        .bind(&draft.title)
        .bind(draft.time_minutes)
        .bind(draft.price)
        .bind(&draft.link)
        .fetch_one(&mut *tx)
        .await
        .context("insert spot")?;

        let mut spot = Spot::from_row(row);
        for kind in AttributeKind::ALL {
            replace_links_tx(&mut tx, kind, spot.id, draft.links(kind)).await?;
            *spot.links_mut(kind) = normalize_ids(draft.links(kind));
        }
        tx.commit().await.context("commit tx")?;
        Ok(spot)
    }

    async fn update_spot(
        &self,
        owner: i64,
        id: i64,
        changes: &SpotChanges,
    ) -> anyhow::Result<Option<Spot>> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        let Some(row) = fetch_spot_row_tx(&mut tx, owner, id).await? else {
            return Ok(None);
        };
        let mut spot = load_links(&mut tx, vec![row])
            .await?
            .pop()
            .context("locked spot vanished")?;
        changes.apply(&mut spot);

        sqlx::query(
            r#"
            UPDATE spots
               SET title = $1, time_minutes = $2, price = $3, link = $4
             WHERE id = $5
            "#,
        )
        .bind(&spot.title)
        .bind(spot.time_minutes)
        .bind(spot.price)
        .bind(&spot.link)
        .bind(spot.id)
        .execute(&mut *tx)
        .await
        .context("update spot")?;

        for kind in AttributeKind::ALL {
            if let Some(ids) = changes.links(kind) {
                replace_links_tx(&mut tx, kind, spot.id, ids).await?;
            }
        }
        tx.commit().await.context("commit tx")?;
        Ok(Some(spot))
    }

    async fn set_spot_image(
        &self,
        owner: i64,
        id: i64,
        image: &str,
    ) -> anyhow::Result<Option<(Spot, Option<String>)>> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        let Some(mut row) = fetch_spot_row_tx(&mut tx, owner, id).await? else {
            return Ok(None);
        };
        sqlx::query("UPDATE spots SET image = $1 WHERE id = $2")
            .bind(image)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("update spot image")?;
        tx.commit().await.context("commit tx")?;

        let previous = row.image.replace(image.to_string());
        let spot = self.load_one(Some(row)).await?;
        Ok(spot.map(|s| (s, previous)))
    }
}
