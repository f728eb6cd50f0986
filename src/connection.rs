//! A thin wrapper around [`mysql_async::Conn`] tied to a [`DatabaseConfig`].
//!
//! Connections are opened one per worker at worker construction time and
//! closed when the worker exits; nothing in the framework shares a connection
//! between threads of control.

use anyhow::{bail, Context};
use mysql_async::prelude::Queryable;
use mysql_async::{Opts, OptsBuilder, Params, Statement};

use crate::config::DatabaseConfig;

impl DatabaseConfig {
    fn opts(&self, with_db: bool) -> Opts {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(if self.pass.is_empty() {
                None
            } else {
                Some(self.pass.clone())
            });

        if with_db {
            builder = builder.db_name(Some(self.database.clone()));
        }

        // mysql_async negotiates CLIENT_MULTI_STATEMENTS as part of its base
        // capability set, so `client_multi_statements` needs no opts wiring;
        // the flag is part of the stable CLI surface.

        builder.into()
    }

    /// Creates the configured database if it does not exist yet.
    pub async fn create_database_if_needed(&self) -> anyhow::Result<()> {
        if self.no_connection {
            return Ok(());
        }

        let mut conn = mysql_async::Conn::new(self.opts(false))
            .await
            .with_context(|| format!("connecting to {}:{}", self.host, self.port))?;
        conn.query_drop(format!(
            "CREATE DATABASE IF NOT EXISTS `{}`",
            self.database
        ))
        .await?;
        conn.disconnect().await?;

        Ok(())
    }

    /// Opens a new [`Connection`] (a pool of `connection_multiplier`
    /// underlying connections, usually one).
    pub async fn connection(&self) -> anyhow::Result<Connection> {
        if self.no_connection {
            return Ok(Connection {
                conns: Vec::new(),
                index: 0,
            });
        }

        let multiplier = self.connection_multiplier.max(1);
        let mut conns = Vec::with_capacity(multiplier);
        for _ in 0..multiplier {
            conns.push(
                mysql_async::Conn::new(self.opts(true))
                    .await
                    .with_context(|| {
                        format!(
                            "connecting to {}:{}/{}",
                            self.host, self.port, self.database
                        )
                    })?,
            );
        }

        Ok(Connection { conns, index: 0 })
    }
}

/// One worker's handle to the database. With a connection multiplier above
/// one this holds a static pool of connections; [`round_robin`]
/// (Self::round_robin) rotates through them, while the query helpers always
/// use the primary connection.
pub struct Connection {
    conns: Vec<mysql_async::Conn>,
    index: usize,
}

impl Connection {
    fn primary(&mut self) -> anyhow::Result<&mut mysql_async::Conn> {
        match self.conns.first_mut() {
            Some(conn) => Ok(conn),
            None => bail!("connection was opened with no_connection set"),
        }
    }

    /// The next underlying connection in round-robin order.
    pub fn round_robin(&mut self) -> anyhow::Result<&mut mysql_async::Conn> {
        if self.conns.is_empty() {
            bail!("connection was opened with no_connection set");
        }

        self.index = (self.index + 1) % self.conns.len();
        Ok(&mut self.conns[self.index])
    }

    pub async fn query_drop(&mut self, query: impl AsRef<str>) -> anyhow::Result<()> {
        Ok(self.primary()?.query_drop(query.as_ref()).await?)
    }

    pub async fn query_first<T>(&mut self, query: impl AsRef<str>) -> anyhow::Result<Option<T>>
    where
        T: mysql_async::prelude::FromRow + Send + 'static,
    {
        Ok(self.primary()?.query_first(query.as_ref()).await?)
    }

    pub async fn prep(&mut self, query: impl AsRef<str>) -> anyhow::Result<Statement> {
        Ok(self.primary()?.prep(query.as_ref()).await?)
    }

    pub async fn exec_drop(
        &mut self,
        stmt: &Statement,
        params: impl Into<Params> + Send,
    ) -> anyhow::Result<()> {
        Ok(self.primary()?.exec_drop(stmt, params).await?)
    }

    /// Closes every underlying connection. Workers call this on exit, on both
    /// the success and the error path.
    pub async fn close(self) -> anyhow::Result<()> {
        for conn in self.conns {
            conn.disconnect().await?;
        }
        Ok(())
    }
}
